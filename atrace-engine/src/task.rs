//! Task identity.
//!
//! The original engine stamps `caller_task` with the raw AmigaOS `Task *`
//! and the daemon later calls `FindTask()`/reads `tc_Node.ln_Name` straight
//! out of that pointer to get a display name. On a host with real process
//! isolation that pointer is meaningless outside the caller's own address
//! space, so `TaskId` is an opaque value (the OS thread id) and names are
//! looked up and copied into a registry at the point of capture, never
//! dereferenced later (SPEC_FULL.md §9, "Task-pointer safety").

use dashmap::DashMap;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl TaskId {
    /// Identity of the calling OS thread, the closest analogue to an
    /// AmigaOS `Task *` available on this host.
    pub fn current() -> Self {
        TaskId(unsafe { libc::gettid() as u32 })
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps `TaskId` to a display name, snapshotted by value at registration
/// time. Entries are process-local; nothing here is mapped across the
/// control region.
#[derive(Default)]
pub struct TaskRegistry {
    names: DashMap<TaskId, String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            names: DashMap::new(),
        }
    }

    /// Record (or refresh) the display name for a task id.
    pub fn register(&self, id: TaskId, name: impl Into<String>) {
        self.names.insert(id, name.into());
    }

    pub fn name(&self, id: TaskId) -> Option<String> {
        self.names.get(&id).map(|e| e.clone())
    }

    pub fn unregister(&self, id: TaskId) {
        self.names.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let reg = TaskRegistry::new();
        let id = TaskId(42);
        reg.register(id, "shell.1");
        assert_eq!(reg.name(id).as_deref(), Some("shell.1"));
        reg.unregister(id);
        assert_eq!(reg.name(id), None);
    }

    #[test]
    fn current_task_is_stable_within_thread() {
        assert_eq!(TaskId::current(), TaskId::current());
    }
}
