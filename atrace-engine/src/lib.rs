//! Core tracing engine: control region lifecycle, per-function patch
//! table, and the traced call path. A host embeds this crate wherever it
//! can intercept the 30 known functions (SPEC_FULL.md §3) and wire each
//! one's real implementation in via [`Engine::register_original`]; the
//! daemon and loader binaries talk to an already-installed engine purely
//! through the control region.

pub mod control;
pub mod error;
pub mod patch;
pub mod ring;
pub mod stub;
pub mod task;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use atrace_proto::{FunctionId, LibId, PatchStatus, all_functions};

pub use control::{ControlRegion, control_path};
pub use error::{EngineError, Result};
pub use patch::{CallArgs, OriginalFn, Patch, PatchTable};
pub use ring::RingView;
pub use task::{TaskId, TaskRegistry};

/// Snapshot of one function's patch state, as reported by `status()`.
#[derive(Clone, Debug)]
pub struct PatchReport {
    pub name: &'static str,
    pub lib: &'static str,
    pub lvo: i16,
    pub enabled: bool,
    pub in_flight: u32,
}

pub struct Engine {
    control: ControlRegion,
    patches: PatchTable,
    tasks: TaskRegistry,
    sequence: AtomicU32,
}

impl Engine {
    /// Install a fresh control region at `path` and stamp a patch-status
    /// row for every known function (noise functions start disabled, per
    /// SPEC_FULL.md §3). No originals are wired up yet; call
    /// `register_original` for each function this host can actually
    /// intercept.
    pub fn install(path: &Path, capacity: u32) -> Result<Self> {
        let capacity = capacity.max(atrace_proto::MIN_RING_CAPACITY);
        let rows: Vec<PatchStatus> = all_functions()
            .map(|meta| {
                let enabled = !atrace_proto::NOISE_FUNCTIONS.contains(&meta.name);
                PatchStatus::new(meta.lib_id as u8, meta.lvo, meta.id.0, enabled)
            })
            .collect();
        let control = ControlRegion::create(path, capacity, &rows)?;
        Ok(Self {
            control,
            patches: PatchTable::new(),
            tasks: TaskRegistry::new(),
            sequence: AtomicU32::new(0),
        })
    }

    /// Attach to an already-installed control region. Used by `atrace-loader`
    /// and `atraced`, neither of which needs a `PatchTable` of its own.
    pub fn attach(path: &Path) -> Result<Self> {
        let control = ControlRegion::attach(path)?;
        Ok(Self {
            control,
            patches: PatchTable::new(),
            tasks: TaskRegistry::new(),
            sequence: AtomicU32::new(0),
        })
    }

    pub fn control_path(&self) -> &Path {
        self.control.path()
    }

    /// Wire the real implementation for a known function into the patch
    /// table. Until this is called for a given function, `invoke` on it
    /// returns `NotInstalled`.
    pub fn register_original(&self, name: &str, original: Arc<OriginalFn>) -> Result<FunctionId> {
        let meta = atrace_proto::lookup_by_name(name)
            .ok_or_else(|| EngineError::UnknownFunction(name.to_string()))?;
        self.patches.install(name, meta.id.0, original)
    }

    pub fn register_task_name(&self, id: TaskId, name: impl Into<String>) {
        self.tasks.register(id, name);
    }

    pub fn task_name(&self, id: TaskId) -> Option<String> {
        self.tasks.name(id)
    }

    /// Call a patched function. If tracing is off (globally, per-function,
    /// or filtered out by task), the call still goes through — only the
    /// tracing side effect is skipped (SPEC_FULL.md invariant: transparent
    /// when disabled). If the ring is full the call still goes through and
    /// the drop is counted, never the other way around.
    pub fn invoke(&self, name: &str, call: CallArgs, caller: TaskId) -> Result<u32> {
        let patch = self
            .patches
            .get_by_name(name)
            .ok_or_else(|| EngineError::NotInstalled)?;

        if !self.should_trace(&patch, caller) {
            return Ok(patch.call_original(&call));
        }

        self.control.enter_call(patch.index);
        let ring = self.control.ring();
        let slot_idx = match ring.reserve_slot() {
            Ok(idx) => idx,
            Err(_) => {
                self.control.leave_call(patch.index);
                return Ok(patch.call_original(&call));
            }
        };

        {
            let slot = ring.slot_mut(slot_idx);
            *slot = atrace_proto::EventSlot::zeroed();
            slot.lib_id = patch.metadata.lib_id as u8;
            slot.lvo = patch.metadata.lvo;
            slot.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            slot.caller_task = caller.0;
            slot.args = call.args;
            slot.arg_count = call.arg_count;
            if let Some(s) = &call.string {
                slot.set_string(s);
            }
        }
        ring.publish_args(slot_idx);
        self.control.incr_events_produced();

        let retval = patch.call_original(&call);

        ring.slot_mut(slot_idx).retval = retval;
        ring.publish_return(slot_idx);
        self.control.leave_call(patch.index);

        Ok(retval)
    }

    fn should_trace(&self, patch: &Patch, caller: TaskId) -> bool {
        if !self.control.global_enable() {
            return false;
        }
        if !self.control.patch_enabled(patch.index) {
            return false;
        }
        match self.control.filter_task() {
            Some(target) => target == caller.0,
            None => true,
        }
    }

    pub fn status(&self) -> Vec<PatchReport> {
        all_functions()
            .map(|meta| PatchReport {
                name: meta.name,
                lib: meta.lib_id.name(),
                lvo: meta.lvo,
                enabled: self.control.patch_enabled(meta.id.0),
                in_flight: self.control.patch_in_flight(meta.id.0),
            })
            .collect()
    }

    /// Global enable/disable (no function names given) or per-function
    /// enable, which validates every name before applying any of them —
    /// the original's two-pass pattern, so a typo in a list of five names
    /// never partially enables the other four.
    pub fn enable(&self, names: Option<&[String]>) -> Result<()> {
        match names {
            None => {
                self.control.set_global_enable(true);
                Ok(())
            }
            Some(names) => {
                let ids = resolve_all(names)?;
                for id in ids {
                    self.control.set_patch_enabled(id.0, true);
                }
                Ok(())
            }
        }
    }

    pub fn disable(&self, names: Option<&[String]>) -> Result<()> {
        match names {
            None => {
                self.control.set_global_enable(false);
                self.drain_in_flight();
                self.control.ring().flush();
                Ok(())
            }
            Some(names) => {
                let ids = resolve_all(names)?;
                for id in ids {
                    self.control.set_patch_enabled(id.0, false);
                }
                Ok(())
            }
        }
    }

    pub fn set_filter_task(&self, task: Option<u32>) {
        self.control.set_filter_task(task);
    }

    pub fn filter_task(&self) -> Option<u32> {
        self.control.filter_task()
    }

    pub fn global_enable(&self) -> bool {
        self.control.global_enable()
    }

    /// First-wins claim of the target-task filter (SPEC_FULL.md §4.9 step
    /// 4): succeeds only if no other session currently holds it.
    pub fn try_claim_filter_task(&self, task: u32) -> bool {
        self.control.try_claim_filter_task(task)
    }

    /// Sum of in-flight counters across every patch. Zero means no call is
    /// currently between `enter_call` and `leave_call` anywhere.
    fn total_in_flight(&self) -> u32 {
        all_functions()
            .map(|meta| self.control.patch_in_flight(meta.id.0))
            .sum()
    }

    /// Poll `total_in_flight` down to zero with a 1-second bound (50 × 20ms,
    /// SPEC_FULL.md §5 cancellation/timeout table) before a disable or quit
    /// advances the ring or reclaims the control region out from under a
    /// call still in progress.
    fn drain_in_flight(&self) {
        for _ in 0..50 {
            if self.total_in_flight() == 0 {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    }

    pub fn ring(&self) -> RingView {
        self.control.ring()
    }

    pub fn events_produced(&self) -> u32 {
        self.control.events_produced()
    }

    pub fn events_consumed(&self) -> u32 {
        self.control.events_consumed()
    }

    pub fn mark_consumed(&self, count: u32) {
        self.control.incr_events_consumed(count);
    }

    /// Tear down: disable, drain in-flight calls, then reclaim the control
    /// region's backing file. Consumes the engine since nothing can use the
    /// region after this (SPEC_FULL.md §9 teardown decision — reclaim
    /// rather than leak).
    pub fn quit(self) -> Result<()> {
        self.control.set_global_enable(false);
        self.drain_in_flight();
        self.control.teardown()
    }
}

fn resolve_all(names: &[String]) -> Result<Vec<FunctionId>> {
    names
        .iter()
        .map(|n| {
            atrace_proto::lookup_by_name(n)
                .map(|m| m.id)
                .ok_or_else(|| EngineError::UnknownFunction(n.clone()))
        })
        .collect()
}

/// Default control-region file name for a given instance name.
pub fn default_control_path(name: &str) -> PathBuf {
    control_path(name)
}

/// Lib-id helper re-exported for callers building `CallArgs` without
/// pulling `atrace-proto` in directly.
pub fn lib_name(lib: LibId) -> &'static str {
    lib.name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn install(dir: &Path) -> Engine {
        Engine::install(&dir.join("t.control"), 64).unwrap()
    }

    #[test]
    fn transparent_passthrough_when_no_original_registered() {
        let dir = tempdir().unwrap();
        let engine = install(dir.path());
        let err = engine
            .invoke("OpenLibrary", CallArgs::default(), TaskId(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotInstalled));
    }

    #[test]
    fn traced_call_reaches_original_and_records_an_event() {
        let dir = tempdir().unwrap();
        let engine = install(dir.path());
        let original: Arc<OriginalFn> = Arc::new(|_call| 0xDEAD_BEEF);
        engine.register_original("OpenLibrary", original).unwrap();

        let retval = engine
            .invoke("OpenLibrary", CallArgs::default(), TaskId(7))
            .unwrap();
        assert_eq!(retval, 0xDEAD_BEEF);

        let drained = engine.ring().drain_ready(8);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].caller_task, 7);
        assert_eq!(drained[0].retval, 0xDEAD_BEEF);
    }

    #[test]
    fn disabled_function_still_calls_through_without_tracing() {
        let dir = tempdir().unwrap();
        let engine = install(dir.path());
        let original: Arc<OriginalFn> = Arc::new(|_call| 1);
        let id = engine.register_original("OpenLibrary", original).unwrap();
        engine.control.set_patch_enabled(id.0, false);

        let retval = engine
            .invoke("OpenLibrary", CallArgs::default(), TaskId(1))
            .unwrap();
        assert_eq!(retval, 1);
        assert_eq!(engine.ring().drain_ready(8).len(), 0);
    }

    #[test]
    fn global_disable_flushes_pending_backlog() {
        let dir = tempdir().unwrap();
        let engine = install(dir.path());
        let original: Arc<OriginalFn> = Arc::new(|_call| 0);
        engine.register_original("OpenLibrary", original).unwrap();
        engine.invoke("OpenLibrary", CallArgs::default(), TaskId(1)).unwrap();

        engine.disable(None).unwrap();
        assert_eq!(engine.ring().drain_ready(8).len(), 0);
        assert!(!engine.should_trace_for_test("OpenLibrary", TaskId(1)));
    }

    #[test]
    fn task_filter_limits_tracing_to_target_task() {
        let dir = tempdir().unwrap();
        let engine = install(dir.path());
        let original: Arc<OriginalFn> = Arc::new(|_call| 0);
        engine.register_original("OpenLibrary", original).unwrap();
        engine.set_filter_task(Some(42));

        engine.invoke("OpenLibrary", CallArgs::default(), TaskId(1)).unwrap();
        assert_eq!(engine.ring().drain_ready(8).len(), 0);

        engine.invoke("OpenLibrary", CallArgs::default(), TaskId(42)).unwrap();
        assert_eq!(engine.ring().drain_ready(8).len(), 1);
    }

    #[test]
    fn enable_disable_validate_all_names_before_applying_any() {
        let dir = tempdir().unwrap();
        let engine = install(dir.path());
        let names = vec!["OpenLibrary".to_string(), "NotAFunction".to_string()];
        let err = engine.disable(Some(&names)).unwrap_err();
        assert!(matches!(err, EngineError::UnknownFunction(_)));
        // OpenLibrary must still be enabled: the bad name aborted before
        // either name was applied.
        assert!(engine.status().iter().find(|p| p.name == "OpenLibrary").unwrap().enabled);
    }

    impl Engine {
        fn should_trace_for_test(&self, name: &str, caller: TaskId) -> bool {
            let patch = self.patches.get_by_name(name);
            match patch {
                Some(p) => self.should_trace(&p, caller),
                None => false,
            }
        }
    }
}
