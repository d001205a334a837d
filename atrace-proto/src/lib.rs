//! Wire-format types and static function metadata shared between the
//! tracing engine and the daemon.
//!
//! The event entry and ring header are the only structures that are
//! genuinely byte-exact across the mmap boundary; everything else here
//! (function tables, register/result-type tags) is process-local metadata
//! both crates need to agree on.

pub mod control;
pub mod event;
pub mod metadata;

pub use control::{ControlHeader, PatchStatus};
pub use event::{EventSlot, FLAG_ARGS_READY, FLAG_RETURN_READY, RingHeader, STRING_DATA_LEN};
pub use metadata::{
    ErrorCheck, FunctionId, FunctionMetadata, LibId, NOISE_FUNCTIONS, Register, ResultType,
    all_functions, lookup_by_id, lookup_by_lib_lvo, lookup_by_name,
};

/// Magic value stamped into the control region header. ASCII "ATRC",
/// carried forward from the original `ATRACE_MAGIC`.
pub const CONTROL_MAGIC: u32 = 0x4154_5243;

/// Current control-region version. Version 2 adds the target-task filter.
pub const CONTROL_VERSION: u16 = 2;

/// Minimum ring capacity; the engine clamps any smaller request up to this.
pub const MIN_RING_CAPACITY: u32 = 16;

/// Default ring capacity when the caller does not specify one.
pub const DEFAULT_RING_CAPACITY: u32 = 8192;

/// Number of events drained per daemon poll cycle.
pub const POLL_BATCH_SIZE: usize = 64;

/// Number of slots in the lock-to-path cache, cleared at each RUN session.
pub const LOCK_PATH_CACHE_SLOTS: usize = 32;

/// Entries in the task-name cache.
pub const TASK_CACHE_SIZE: usize = 64;

/// Refresh the task-name cache roughly every this many poll cycles (~5s at
/// a 1s poll timeout with eager re-polling while tracing).
pub const TASK_CACHE_REFRESH_POLLS: u32 = 50;
