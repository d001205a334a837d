//! Control-region header and per-function patch status, the two pieces of
//! the shared region besides the ring that a second process must be able
//! to read (and, for patch status, mutate) without calling back into the
//! engine process.
//!
//! Unlike `EventSlot`/`RingHeader`, these are not required to match the
//! original's 84-byte anchor exactly (SPEC_FULL.md §6): only the ring and
//! its entries are genuinely byte-exact wire format here. Cross-process
//! visibility for these fields is achieved with atomics over the mapped
//! memory, not with the original's named semaphore.

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ControlHeader {
    pub magic: u32,
    pub version: u16,
    _pad: u16,
    /// 0/1, mutated under the daemon's global ENABLE/DISABLE and read by
    /// every stub invocation.
    pub global_enable: u32,
    pub patch_count: u32,
    pub events_produced: u32,
    pub events_consumed: u32,
    /// Target-task filter, version >= 2 only. 0 means "unset".
    pub filter_task: u32,
}

impl ControlHeader {
    pub const fn new(patch_count: u32) -> Self {
        Self {
            magic: crate::CONTROL_MAGIC,
            version: crate::CONTROL_VERSION,
            _pad: 0,
            global_enable: 1,
            patch_count,
            events_produced: 0,
            events_consumed: 0,
            filter_task: 0,
        }
    }
}

/// Cross-process-visible per-patch state: whether the patch is enabled and
/// how many calls are currently in flight. The library id, LVO, and
/// function id are included so a second process can identify patches
/// without a side channel.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PatchStatus {
    pub lib_id: u8,
    _pad0: u8,
    pub lvo: i16,
    pub func_id: u16,
    _pad1: u16,
    pub enabled: u32,
    pub in_flight: u32,
}

impl PatchStatus {
    pub const fn new(lib_id: u8, lvo: i16, func_id: u16, enabled: bool) -> Self {
        Self {
            lib_id,
            _pad0: 0,
            lvo,
            func_id,
            _pad1: 0,
            enabled: enabled as u32,
            in_flight: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_header_roundtrips_magic() {
        let h = ControlHeader::new(30);
        assert_eq!(h.magic, crate::CONTROL_MAGIC);
        assert_eq!(h.version, crate::CONTROL_VERSION);
        assert_eq!(h.patch_count, 30);
    }
}
