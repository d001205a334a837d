//! Ring buffer access over the mapped control region.
//!
//! `ringbuf.c` reserved a slot under `Disable()`/`Enable()` (AmigaOS's
//! cheap "nothing else on this CPU can run right now" exclusion) because
//! the original SPSC ring only ever had one producer task at a time. Real
//! hosts have genuine multi-core concurrency and multiple call sites can
//! race to reserve a slot simultaneously, so reservation here is a CAS
//! loop over `write_pos` instead (SPEC_FULL.md REDESIGN FLAGS item 1) —
//! the one place the original's "single CPU, no true parallelism" Non-goal
//! does not carry over unchanged.

use atrace_proto::{EventSlot, FLAG_ARGS_READY, FLAG_RETURN_READY, RingHeader};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use crate::error::{EngineError, Result};

/// Thin, `Copy`-able view over a ring header + entries already living
/// inside a mapped region. Does not own the memory; `ControlRegion` does.
#[derive(Copy, Clone)]
pub struct RingView {
    header: *mut RingHeader,
    entries: *mut EventSlot,
    capacity: u32,
}

unsafe impl Send for RingView {}
unsafe impl Sync for RingView {}

impl RingView {
    /// # Safety
    /// `header` and `entries` must point into the same mapped region for
    /// the lifetime of this view, `entries` must have room for `capacity`
    /// slots, and no other non-atomic access to this memory may occur
    /// concurrently.
    pub unsafe fn new(header: *mut RingHeader, entries: *mut EventSlot, capacity: u32) -> Self {
        Self {
            header,
            entries,
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn write_pos(&self) -> &AtomicU32 {
        unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*self.header).write_pos)) }
    }

    fn read_pos(&self) -> &AtomicU32 {
        unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*self.header).read_pos)) }
    }

    fn overflow(&self) -> &AtomicU32 {
        unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*self.header).overflow)) }
    }

    fn slot_ptr(&self, idx: u32) -> *mut EventSlot {
        unsafe { self.entries.add(idx as usize) }
    }

    fn flags(&self, idx: u32) -> &AtomicU8 {
        unsafe { AtomicU8::from_ptr(std::ptr::addr_of_mut!((*self.slot_ptr(idx)).flags)) }
    }

    /// Reserve the next slot for writing. Returns the slot index, or
    /// `RingFull` if the ring has caught up to `read_pos` (the producer
    /// records the drop in the shared overflow counter and moves on,
    /// matching the original's behavior of never blocking on a full ring).
    pub fn reserve_slot(&self) -> Result<u32> {
        loop {
            let current = self.write_pos().load(Ordering::Acquire);
            let next = (current + 1) % self.capacity;
            if next == self.read_pos().load(Ordering::Acquire) {
                self.overflow().fetch_add(1, Ordering::Relaxed);
                return Err(EngineError::RingFull);
            }
            if self
                .write_pos()
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(current);
            }
        }
    }

    /// Exclusive access to a just-reserved slot. Safe because CAS-based
    /// reservation guarantees no other producer holds the same index until
    /// it wraps all the way back around, which cannot happen before this
    /// slot is published and drained.
    pub fn slot_mut(&self, idx: u32) -> &mut EventSlot {
        unsafe { &mut *self.slot_ptr(idx) }
    }

    pub fn publish_args(&self, idx: u32) {
        self.flags(idx).fetch_or(FLAG_ARGS_READY, Ordering::Release);
    }

    pub fn publish_return(&self, idx: u32) {
        self.flags(idx).fetch_or(FLAG_RETURN_READY, Ordering::Release);
    }

    pub fn slot_flags(&self, idx: u32) -> u8 {
        self.flags(idx).load(Ordering::Acquire)
    }

    /// Drain up to `max` ready slots starting at the current read position,
    /// copying each out and clearing its flags so the slot can be reused.
    /// A slot with `FLAG_ARGS_READY` but not `FLAG_RETURN_READY` is still
    /// drained: the call was still in flight when the daemon polled, and
    /// the formatter renders the return value as pending rather than
    /// waiting for it (avoids stalling the whole ring behind one blocked
    /// call).
    pub fn drain_ready(&self, max: usize) -> Vec<EventSlot> {
        let mut out = Vec::with_capacity(max.min(self.capacity as usize));
        let write_pos = self.write_pos().load(Ordering::Acquire);
        let mut read_pos = self.read_pos().load(Ordering::Acquire);

        if read_pos >= self.capacity {
            // Corrupt/foreign reader state; resynchronize rather than walk
            // off the end of the entries slice.
            read_pos = write_pos;
            self.read_pos().store(read_pos, Ordering::Release);
            return out;
        }

        while out.len() < max && read_pos != write_pos {
            let flags = self.slot_flags(read_pos);
            if flags & FLAG_ARGS_READY == 0 {
                break;
            }
            out.push(*self.slot_mut(read_pos));
            self.flags(read_pos).store(0, Ordering::Release);
            read_pos = (read_pos + 1) % self.capacity;
            self.read_pos().store(read_pos, Ordering::Release);
        }
        out
    }

    /// Swap the overflow counter back to zero, returning the number of
    /// events dropped since the last call. Used when the daemon clears its
    /// own drop counter after reporting it.
    pub fn take_overflow(&self) -> u32 {
        self.overflow().swap(0, Ordering::AcqRel)
    }

    /// Discard everything currently queued without reading it, clearing
    /// flags as it goes and advancing `read_pos` straight to `write_pos`.
    /// Used on global disable so a later RUN session starts from a clean
    /// ring rather than replaying whatever was produced while disabling
    /// (the stub's use-count drains within one timeslice; this is the
    /// ring-side half of that same cleanup).
    pub fn flush(&self) -> u32 {
        let write_pos = self.write_pos().load(Ordering::Acquire);
        let mut read_pos = self.read_pos().load(Ordering::Acquire);
        if read_pos >= self.capacity {
            read_pos = write_pos;
        }
        let mut count = 0u32;
        while read_pos != write_pos {
            self.flags(read_pos).store(0, Ordering::Release);
            read_pos = (read_pos + 1) % self.capacity;
            count += 1;
        }
        self.read_pos().store(read_pos, Ordering::Release);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ring(capacity: u32) -> (Box<RingHeader>, Vec<EventSlot>, RingView) {
        let mut header = Box::new(RingHeader::zeroed_with_capacity(capacity));
        let mut entries = vec![EventSlot::zeroed(); capacity as usize];
        let view = unsafe { RingView::new(&mut *header, entries.as_mut_ptr(), capacity) };
        (header, entries, view)
    }

    #[test]
    fn reserve_and_drain_roundtrip() {
        let (_h, _e, ring) = make_ring(4);
        let idx = ring.reserve_slot().unwrap();
        ring.slot_mut(idx).sequence = 7;
        ring.publish_args(idx);
        ring.publish_return(idx);

        let drained = ring.drain_ready(16);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].sequence, 7);
        assert_eq!(drained[0].flags & FLAG_RETURN_READY, FLAG_RETURN_READY);
    }

    #[test]
    fn full_ring_reports_overflow() {
        // capacity 4 can only hold 3 live entries (one slot always kept
        // empty to disambiguate full from empty), matching the original.
        let (_h, _e, ring) = make_ring(4);
        for _ in 0..3 {
            let idx = ring.reserve_slot().unwrap();
            ring.publish_args(idx);
            ring.publish_return(idx);
        }
        assert!(matches!(ring.reserve_slot(), Err(EngineError::RingFull)));
        assert_eq!(ring.take_overflow(), 1);
    }

    #[test]
    fn flush_clears_backlog_without_returning_it() {
        let (_h, _e, ring) = make_ring(4);
        let idx = ring.reserve_slot().unwrap();
        ring.publish_args(idx);
        assert_eq!(ring.flush(), 1);
        assert_eq!(ring.drain_ready(16).len(), 0);
    }

    #[test]
    fn in_flight_slot_drains_with_return_pending() {
        let (_h, _e, ring) = make_ring(4);
        let idx = ring.reserve_slot().unwrap();
        ring.publish_args(idx);
        // No publish_return yet: call is still in flight.
        let drained = ring.drain_ready(16);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].flags & FLAG_RETURN_READY, 0);
    }
}
