//! Resolves a traced call's `caller_task` (an OS thread id, see
//! `atrace_engine::TaskId`) to a display name.
//!
//! The original daemon read `tc_Node.ln_Name` directly out of the raw
//! `Task *` captured in the event, safe only because producer and
//! consumer shared one AmigaOS address space. That pointer isn't
//! meaningful across real process boundaries (SPEC_FULL.md §9), so this
//! cache instead reads `/proc/<tid>/comm` and refreshes periodically
//! rather than trusting a name forever (tids get reused).

use dashmap::DashMap;

struct CachedName {
    name: String,
    cached_at_cycle: u32,
}

pub struct TaskNameCache {
    entries: DashMap<u32, CachedName>,
    capacity: usize,
    refresh_every: u32,
}

impl TaskNameCache {
    pub fn new(capacity: usize, refresh_every: u32) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            refresh_every,
        }
    }

    /// Look up (or refresh) the display name for `tid` at poll cycle
    /// `cycle`. Falls back to `"tid:<n>"` if `/proc/<tid>/comm` is gone
    /// (the task has already exited).
    pub fn name_for(&self, tid: u32, cycle: u32) -> String {
        if let Some(entry) = self.entries.get(&tid) {
            if cycle.saturating_sub(entry.cached_at_cycle) < self.refresh_every {
                return entry.name.clone();
            }
        }

        let name = read_comm(tid).unwrap_or_else(|| format!("tid:{tid}"));
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&tid) {
            self.evict_one();
        }
        self.entries.insert(
            tid,
            CachedName {
                name: name.clone(),
                cached_at_cycle: cycle,
            },
        );
        name
    }

    fn evict_one(&self) {
        if let Some(key) = self.entries.iter().next().map(|e| *e.key()) {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn read_comm(tid: u32) -> Option<String> {
    let path = format!("/proc/{tid}/comm");
    std::fs::read_to_string(path).ok().map(|s| s.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_task_falls_back_to_tid_label() {
        let cache = TaskNameCache::new(4, 50);
        let name = cache.name_for(999_999_999, 0);
        assert_eq!(name, "tid:999999999");
    }

    #[test]
    fn cache_respects_capacity() {
        let cache = TaskNameCache::new(2, 50);
        cache.name_for(1, 0);
        cache.name_for(2, 0);
        cache.name_for(3, 0);
        assert!(cache.len() <= 2);
    }
}
