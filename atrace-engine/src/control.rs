//! Control region: the memory-mapped, named-file-backed stand-in for the
//! original's semaphore-anchored shared structure (SPEC_FULL.md §4.1).
//! Discoverable by a well-known path rather than `FindSemaphore()`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use atrace_proto::{ControlHeader, EventSlot, PatchStatus, RingHeader};
use memmap2::MmapMut;

use crate::error::{EngineError, Result};
use crate::ring::RingView;

fn region_len(patch_count: u32, capacity: u32) -> usize {
    std::mem::size_of::<ControlHeader>()
        + patch_count as usize * std::mem::size_of::<PatchStatus>()
        + std::mem::size_of::<RingHeader>()
        + capacity as usize * std::mem::size_of::<EventSlot>()
}

/// Well-known path for a control region of the given name, mirroring
/// `FindSemaphore(ATRACE_SEM_NAME)` discovery by a published name instead
/// of a pointer.
pub fn control_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}.atrace-control"))
}

pub struct ControlRegion {
    mmap: MmapMut,
    patch_count: u32,
    capacity: u32,
    path: PathBuf,
}

unsafe impl Send for ControlRegion {}
unsafe impl Sync for ControlRegion {}

impl ControlRegion {
    /// Create a fresh control region backed by a new file at `path`,
    /// zero-initialized then stamped with header/patch-table/ring state.
    /// Fails if a region already exists at that path (mirrors the
    /// original's "install" path refusing to run twice).
    pub fn create(path: &Path, capacity: u32, patches: &[PatchStatus]) -> Result<Self> {
        if path.exists() {
            return Err(EngineError::AlreadyInstalled);
        }
        let patch_count = patches.len() as u32;
        let len = region_len(patch_count, capacity);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(len as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut region = ControlRegion {
            mmap,
            patch_count,
            capacity,
            path: path.to_path_buf(),
        };

        *region.header_mut() = ControlHeader::new(patch_count);
        for (i, p) in patches.iter().enumerate() {
            *region.patch_status_mut(i as u32).expect("in bounds") = *p;
        }
        *region.ring_header_mut() = RingHeader::zeroed_with_capacity(capacity);

        Ok(region)
    }

    /// Attach to an existing control region, validating its magic and
    /// version.
    pub fn attach(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() < std::mem::size_of::<ControlHeader>() {
            return Err(EngineError::ControlRegionCorrupt("file too small for header"));
        }

        let header: ControlHeader = *bytemuck::from_bytes(&mmap[..std::mem::size_of::<ControlHeader>()]);
        if header.magic != atrace_proto::CONTROL_MAGIC {
            return Err(EngineError::ControlRegionCorrupt("bad magic"));
        }
        if header.version != atrace_proto::CONTROL_VERSION {
            return Err(EngineError::ControlRegionCorrupt("unsupported version"));
        }

        let patch_count = header.patch_count;
        let header_and_patches = std::mem::size_of::<ControlHeader>()
            + patch_count as usize * std::mem::size_of::<PatchStatus>();
        if mmap.len() < header_and_patches + std::mem::size_of::<RingHeader>() {
            return Err(EngineError::ControlRegionCorrupt("file too small for patch table"));
        }
        let ring_header: RingHeader = *bytemuck::from_bytes(
            &mmap[header_and_patches..header_and_patches + std::mem::size_of::<RingHeader>()],
        );
        let capacity = ring_header.capacity;
        let expected = region_len(patch_count, capacity);
        if mmap.len() < expected {
            return Err(EngineError::ControlRegionCorrupt("file too small for ring entries"));
        }

        Ok(ControlRegion {
            mmap,
            patch_count,
            capacity,
            path: path.to_path_buf(),
        })
    }

    /// Unmap and delete the backing file, reclaiming the region instead of
    /// leaking it forever (SPEC_FULL.md §9, teardown open question).
    pub fn teardown(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn patch_count(&self) -> u32 {
        self.patch_count
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn header_ptr(&self) -> *mut ControlHeader {
        self.mmap.as_ptr() as *mut ControlHeader
    }

    fn header_mut(&mut self) -> &mut ControlHeader {
        unsafe { &mut *self.header_ptr() }
    }

    fn patch_table_offset() -> usize {
        std::mem::size_of::<ControlHeader>()
    }

    fn patch_status_ptr(&self, idx: u32) -> Option<*mut PatchStatus> {
        if idx >= self.patch_count {
            return None;
        }
        let base = unsafe { self.mmap.as_ptr().add(Self::patch_table_offset()) } as *mut PatchStatus;
        Some(unsafe { base.add(idx as usize) })
    }

    fn patch_status_mut(&mut self, idx: u32) -> Option<&mut PatchStatus> {
        self.patch_status_ptr(idx).map(|p| unsafe { &mut *p })
    }

    fn ring_header_offset(&self) -> usize {
        Self::patch_table_offset() + self.patch_count as usize * std::mem::size_of::<PatchStatus>()
    }

    fn ring_header_ptr(&self) -> *mut RingHeader {
        unsafe { self.mmap.as_ptr().add(self.ring_header_offset()) as *mut RingHeader }
    }

    fn ring_header_mut(&mut self) -> &mut RingHeader {
        unsafe { &mut *self.ring_header_ptr() }
    }

    fn entries_ptr(&self) -> *mut EventSlot {
        let offset = self.ring_header_offset() + std::mem::size_of::<RingHeader>();
        unsafe { self.mmap.as_ptr().add(offset) as *mut EventSlot }
    }

    /// Borrow the ring as an atomic `RingView`. Safe to call repeatedly and
    /// to share across threads: the view never aliases the header/entries
    /// mutably outside of atomic access.
    pub fn ring(&self) -> RingView {
        unsafe { RingView::new(self.ring_header_ptr(), self.entries_ptr(), self.capacity) }
    }

    fn global_enable_atomic(&self) -> &AtomicU32 {
        unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*self.header_ptr()).global_enable)) }
    }

    pub fn global_enable(&self) -> bool {
        self.global_enable_atomic().load(Ordering::Acquire) != 0
    }

    pub fn set_global_enable(&self, enabled: bool) {
        self.global_enable_atomic()
            .store(enabled as u32, Ordering::Release);
    }

    fn filter_task_atomic(&self) -> &AtomicU32 {
        unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*self.header_ptr()).filter_task)) }
    }

    pub fn filter_task(&self) -> Option<u32> {
        match self.filter_task_atomic().load(Ordering::Acquire) {
            0 => None,
            t => Some(t),
        }
    }

    pub fn set_filter_task(&self, task: Option<u32>) {
        self.filter_task_atomic()
            .store(task.unwrap_or(0), Ordering::Release);
    }

    /// Claim the target-task filter iff it is currently unset, first-wins
    /// (SPEC_FULL.md §4.9 step 4): a concurrent RUN session that loses the
    /// race falls back to daemon-side filtering instead of clobbering the
    /// winner's filter.
    pub fn try_claim_filter_task(&self, task: u32) -> bool {
        self.filter_task_atomic()
            .compare_exchange(0, task, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn events_produced_atomic(&self) -> &AtomicU32 {
        unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*self.header_ptr()).events_produced)) }
    }

    fn events_consumed_atomic(&self) -> &AtomicU32 {
        unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*self.header_ptr()).events_consumed)) }
    }

    pub fn incr_events_produced(&self) {
        self.events_produced_atomic().fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_events_consumed(&self, by: u32) {
        self.events_consumed_atomic().fetch_add(by, Ordering::Relaxed);
    }

    pub fn events_produced(&self) -> u32 {
        self.events_produced_atomic().load(Ordering::Acquire)
    }

    pub fn events_consumed(&self) -> u32 {
        self.events_consumed_atomic().load(Ordering::Acquire)
    }

    fn patch_enabled_atomic(&self, idx: u32) -> Option<&AtomicU32> {
        self.patch_status_ptr(idx)
            .map(|p| unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*p).enabled)) })
    }

    fn patch_in_flight_atomic(&self, idx: u32) -> Option<&AtomicU32> {
        self.patch_status_ptr(idx)
            .map(|p| unsafe { AtomicU32::from_ptr(std::ptr::addr_of_mut!((*p).in_flight)) })
    }

    pub fn patch_enabled(&self, idx: u32) -> bool {
        self.patch_enabled_atomic(idx)
            .map(|a| a.load(Ordering::Acquire) != 0)
            .unwrap_or(false)
    }

    pub fn set_patch_enabled(&self, idx: u32, enabled: bool) {
        if let Some(a) = self.patch_enabled_atomic(idx) {
            a.store(enabled as u32, Ordering::Release);
        }
    }

    pub fn patch_in_flight(&self, idx: u32) -> u32 {
        self.patch_in_flight_atomic(idx)
            .map(|a| a.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn enter_call(&self, idx: u32) {
        if let Some(a) = self.patch_in_flight_atomic(idx) {
            a.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn leave_call(&self, idx: u32) {
        if let Some(a) = self.patch_in_flight_atomic(idx) {
            a.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn patch_status(&self, idx: u32) -> Option<PatchStatus> {
        self.patch_status_ptr(idx).map(|p| unsafe { *p })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_patches() -> Vec<PatchStatus> {
        vec![
            PatchStatus::new(0, -552, 5, true),
            PatchStatus::new(1, -84, 14, true),
        ]
    }

    #[test]
    fn create_then_attach_roundtrips_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.control");
        let region = ControlRegion::create(&path, 64, &sample_patches()).unwrap();
        assert!(region.global_enable());
        region.set_global_enable(false);
        region.set_patch_enabled(1, false);
        drop(region);

        let attached = ControlRegion::attach(&path).unwrap();
        assert!(!attached.global_enable());
        assert_eq!(attached.patch_count(), 2);
        assert!(attached.patch_enabled(0));
        assert!(!attached.patch_enabled(1));
        assert_eq!(attached.capacity(), 64);
    }

    #[test]
    fn create_refuses_to_overwrite_existing_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.control");
        let _first = ControlRegion::create(&path, 64, &sample_patches()).unwrap();
        let second = ControlRegion::create(&path, 64, &sample_patches());
        assert!(matches!(second, Err(EngineError::AlreadyInstalled)));
    }

    #[test]
    fn teardown_removes_backing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.control");
        let region = ControlRegion::create(&path, 64, &sample_patches()).unwrap();
        region.teardown().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn ring_survives_through_the_view() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.control");
        let region = ControlRegion::create(&path, 64, &sample_patches()).unwrap();
        let ring = region.ring();
        let idx = ring.reserve_slot().unwrap();
        ring.slot_mut(idx).sequence = 99;
        ring.publish_args(idx);
        ring.publish_return(idx);
        let drained = ring.drain_ready(8);
        assert_eq!(drained[0].sequence, 99);
    }
}
