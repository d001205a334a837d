//! Ring buffer header and fixed-size event entry.
//!
//! Both types are `#[repr(C)]` + `bytemuck::Pod` so they can be written
//! directly into an mmap'd region and read back without parsing. Fields
//! that need cross-thread visibility (the slot flags, the ring's write/read
//! positions) are never accessed through the struct directly once mapped;
//! callers obtain an `AtomicU8`/`AtomicU32` view over the field's address
//! instead (see `atrace_engine::ring`), exactly as the struct's on-disk
//! layout is the only thing that must stay stable.

use bytemuck::{Pod, Zeroable};

pub const STRING_DATA_LEN: usize = 24;

/// Bit of `EventSlot::flags` set once the argument fields (lib/lvo/seq/
/// caller/args/arg_count/string) are fully written and safe to read.
pub const FLAG_ARGS_READY: u8 = 0b01;
/// Bit of `EventSlot::flags` set once `retval` has been written by the
/// post-call handler. A consumer that sees `ARGS_READY` without
/// `RETURN_READY` is looking at a call still in flight (e.g. blocked on a
/// nested operation) and should render the return value as pending.
pub const FLAG_RETURN_READY: u8 = 0b10;

/// One traced call, exactly 64 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct EventSlot {
    /// `FLAG_ARGS_READY` / `FLAG_RETURN_READY`, see above. Named `flags`
    /// rather than `valid` because publication is two-phase (design note
    /// in SPEC_FULL.md REDESIGN FLAGS item 2); bit 0 alone plays the role
    /// the original single `valid` byte played.
    pub flags: u8,
    pub lib_id: u8,
    pub lvo: i16,
    pub sequence: u32,
    pub caller_task: u32,
    pub args: [u32; 4],
    pub retval: u32,
    pub arg_count: u8,
    _pad0: u8,
    pub string_data: [u8; STRING_DATA_LEN],
    _reserved: [u8; 6],
}

impl EventSlot {
    pub const fn zeroed() -> Self {
        Self {
            flags: 0,
            lib_id: 0,
            lvo: 0,
            sequence: 0,
            caller_task: 0,
            args: [0; 4],
            retval: 0,
            arg_count: 0,
            _pad0: 0,
            string_data: [0; STRING_DATA_LEN],
            _reserved: [0; 6],
        }
    }

    /// Copies up to `STRING_DATA_LEN - 1` bytes of `s`, NUL-terminated.
    /// Mirrors the original stub's 23-byte bounded copy.
    pub fn set_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(STRING_DATA_LEN - 1);
        self.string_data = [0; STRING_DATA_LEN];
        self.string_data[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn string_lossy(&self) -> std::borrow::Cow<'_, str> {
        let end = self
            .string_data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(STRING_DATA_LEN);
        String::from_utf8_lossy(&self.string_data[..end])
    }

    /// True if the string looked truncated at capture time (filled all
    /// usable bytes with no room for the terminator to have come from a
    /// shorter source string).
    pub fn string_truncated(&self) -> bool {
        !self.string_data.contains(&0)
    }
}

/// Ring header: capacity plus the write/read positions and overflow
/// counter. Entries follow immediately after this header in the mapped
/// region.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RingHeader {
    pub capacity: u32,
    pub write_pos: u32,
    pub read_pos: u32,
    pub overflow: u32,
}

impl RingHeader {
    pub const fn zeroed_with_capacity(capacity: u32) -> Self {
        Self {
            capacity,
            write_pos: 0,
            read_pos: 0,
            overflow: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_slot_is_64_bytes() {
        assert_eq!(std::mem::size_of::<EventSlot>(), 64);
    }

    #[test]
    fn ring_header_is_16_bytes() {
        assert_eq!(std::mem::size_of::<RingHeader>(), 16);
    }

    #[test]
    fn string_roundtrip_truncates() {
        let mut slot = EventSlot::zeroed();
        slot.set_string("RAM:");
        assert_eq!(slot.string_lossy(), "RAM:");
        assert!(!slot.string_truncated());

        let long = "x".repeat(40);
        slot.set_string(&long);
        assert_eq!(slot.string_lossy().len(), STRING_DATA_LEN - 1);
        assert!(slot.string_truncated());
    }
}
