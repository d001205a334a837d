//! Thin consumer-side wrapper over `atrace_engine`'s ring: drains a batch
//! per cycle, counts it into the control region, and tracks the poll
//! cycle number the task-name cache keys its refresh policy on.

use atrace_engine::Engine;
use atrace_proto::EventSlot;

pub struct Poller {
    cycle: u32,
    batch_size: usize,
}

impl Poller {
    pub fn new(batch_size: usize) -> Self {
        Self { cycle: 0, batch_size }
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Drain one batch and advance the cycle counter. Returns the drained
    /// events plus how many were dropped by the ring since the last poll.
    pub fn poll(&mut self, engine: &Engine) -> (Vec<EventSlot>, u32) {
        let ring = engine.ring();
        let drained = ring.drain_ready(self.batch_size);
        let dropped = ring.take_overflow();
        engine.mark_consumed(drained.len() as u32);
        self.cycle = self.cycle.wrapping_add(1);
        (drained, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrace_engine::CallArgs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn poll_drains_and_advances_cycle() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let original: Arc<atrace_engine::OriginalFn> = Arc::new(|_call| 0);
        engine.register_original("OpenLibrary", original).unwrap();
        engine
            .invoke("OpenLibrary", CallArgs::default(), atrace_engine::TaskId(1))
            .unwrap();

        let mut poller = Poller::new(8);
        let (events, dropped) = poller.poll(&engine);
        assert_eq!(events.len(), 1);
        assert_eq!(dropped, 0);
        assert_eq!(poller.cycle(), 1);
    }
}
