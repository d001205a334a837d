//! TRACE session manager, ported from `trace_cmd_start`/`trace_cmd_run`/
//! `trace_check_run_completed` in the original daemon: at most one session
//! (START or RUN) is active engine-wide at a time, the lock-to-path cache
//! is cleared at the start of every session (S2), and a RUN session owns
//! child-process lifecycle, noise-function auto-enable/restore, and the
//! stub-level target-task filter it claims first-wins.

use std::fmt;
use std::process::{Child, Command};

use atrace_engine::Engine;
use atrace_proto::{EventSlot, FunctionMetadata, LibId, NOISE_FUNCTIONS};

use crate::filter::{ClientFilter, FilterError};
use crate::formatter::{LockPathCache, trace_format_event};
use crate::taskcache::TaskNameCache;

#[derive(Debug)]
pub enum SessionError {
    AlreadyActive,
    NotActive,
    ProcessTableFull,
    MissingCommand,
    Filter(FilterError),
    Spawn(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyActive => write!(f, "a trace session is already active"),
            SessionError::NotActive => write!(f, "no trace session is active"),
            SessionError::ProcessTableFull => write!(f, "no free process-table slot for RUN"),
            SessionError::MissingCommand => {
                write!(f, "RUN requires `-- command args...`")
            }
            SessionError::Filter(e) => write!(f, "{e}"),
            SessionError::Spawn(e) => write!(f, "failed to spawn child process: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<FilterError> for SessionError {
    fn from(e: FilterError) -> Self {
        SessionError::Filter(e)
    }
}

/// State a RUN session keeps beyond what a plain START session needs.
struct RunState {
    child: Child,
    run_task: u32,
    run_start_seq: u32,
    owns_filter: bool,
    noise_save: Vec<(&'static str, bool)>,
}

enum Kind {
    Start,
    Run(RunState),
}

struct ActiveSession {
    filter: ClientFilter,
    lock_cache: LockPathCache,
    kind: Kind,
}

enum State {
    Idle,
    Active(ActiveSession),
}

pub struct RunSession {
    state: State,
    lock_cache_slots: usize,
    max_tracked_procs: usize,
}

impl RunSession {
    pub fn new(lock_cache_slots: usize, max_tracked_procs: usize) -> Self {
        Self {
            state: State::Idle,
            lock_cache_slots,
            max_tracked_procs,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active { .. })
    }

    /// TRACE START: stream every call the filter accepts, unscoped to any
    /// one task.
    pub fn start(&mut self, _engine: &Engine, filter_buf: &str) -> Result<(), SessionError> {
        if self.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        self.state = State::Active(ActiveSession {
            filter: ClientFilter::parse(filter_buf),
            lock_cache: LockPathCache::new(self.lock_cache_slots),
            kind: Kind::Start,
        });
        Ok(())
    }

    /// TRACE RUN `[CD=path] [filters] -- command args...` (SPEC_FULL.md
    /// §4.9, §6). Spawns the child, snapshots a start-sequence before it
    /// can produce any events, claims the stub-level target-task filter
    /// first-wins, and auto-enables noise functions if it won the claim.
    pub fn start_run(&mut self, engine: &Engine, rest: &str) -> Result<(), SessionError> {
        if self.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        if self.max_tracked_procs == 0 {
            return Err(SessionError::ProcessTableFull);
        }

        let mut tokens: Vec<&str> = rest.split_whitespace().collect();
        let cd = tokens.first().and_then(|t| t.strip_prefix("CD=")).map(str::to_string);
        if cd.is_some() {
            tokens.remove(0);
        }

        let Some(sep_idx) = tokens.iter().position(|&t| t == "--") else {
            return Err(SessionError::MissingCommand);
        };
        let filter_buf = tokens[..sep_idx].join(" ");
        let Some((program, args)) = tokens[sep_idx + 1..].split_first() else {
            return Err(SessionError::MissingCommand);
        };

        let filter = ClientFilter::parse_for_run(&filter_buf)?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &cd {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn().map_err(SessionError::Spawn)?;
        let run_task = child.id();
        let run_start_seq = engine.events_produced();

        let noise_save = save_noise_state(engine);
        let owns_filter = engine.try_claim_filter_task(run_task);
        if owns_filter {
            let all_noise: Vec<String> = NOISE_FUNCTIONS.iter().map(|s| s.to_string()).collect();
            let _ = engine.enable(Some(&all_noise));
        }

        self.state = State::Active(ActiveSession {
            filter,
            lock_cache: LockPathCache::new(self.lock_cache_slots),
            kind: Kind::Run(RunState {
                child,
                run_task,
                run_start_seq,
                owns_filter,
                noise_save,
            }),
        });
        Ok(())
    }

    /// Ends an active session. For a RUN session this also restores saved
    /// noise-function state and releases the target-task filter if this
    /// session owned it — the same cleanup `poll_completion` runs on
    /// normal child exit, so a manual STOP can't leave the daemon stuck
    /// filtered to an exited task.
    pub fn stop(&mut self, engine: &Engine) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => Err(SessionError::NotActive),
            State::Active(session) => {
                if let Kind::Run(run) = session.kind {
                    cleanup_run(engine, &run);
                }
                Ok(())
            }
        }
    }

    /// Called once per poll cycle regardless of session kind. If the
    /// active session is a RUN whose child has exited, performs the final
    /// bounded drain (up to ring capacity), renders the events still
    /// addressed to it, appends `# PROCESS EXITED rc=N`, and returns to
    /// IDLE (SPEC_FULL.md §4.9 completion flow, Scenario S4).
    pub fn poll_completion(
        &mut self,
        engine: &Engine,
        task_names: &TaskNameCache,
        cycle: u32,
        timestamp: &str,
    ) -> Option<Vec<String>> {
        let exited = match &mut self.state {
            State::Active(session) => match &mut session.kind {
                Kind::Run(run) => match run.child.try_wait() {
                    Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
                    _ => None,
                },
                Kind::Start => None,
            },
            State::Idle => None,
        };
        let rc = exited?;

        let State::Active(session) = std::mem::replace(&mut self.state, State::Idle) else {
            unreachable!("checked Active above");
        };
        let Kind::Run(run) = session.kind else {
            unreachable!("checked Run above");
        };
        let mut lock_cache = session.lock_cache;
        let filter = session.filter;
        let task_name = task_names.name_for(run.run_task, cycle);

        let drained = engine.ring().drain_ready(engine.ring().capacity() as usize);
        engine.mark_consumed(drained.len() as u32);

        let mut lines = Vec::new();
        for slot in &drained {
            if !belongs_to_run(slot, &run) {
                continue;
            }
            let Some(meta) = atrace_proto::lookup_by_lib_lvo(lib_id_from(slot.lib_id), slot.lvo) else {
                continue;
            };
            let return_ready = slot.flags & atrace_proto::FLAG_RETURN_READY != 0;
            if !filter.matches(meta, &task_name, slot.retval, return_ready) {
                continue;
            }
            lines.push(trace_format_event(meta, slot, &task_name, timestamp, &mut lock_cache));
        }
        lines.push(format!("# PROCESS EXITED rc={rc}"));

        cleanup_run(engine, &run);
        Some(lines)
    }

    /// Renders one already-drained event if the active session's filter
    /// (and, for a RUN session, its task/sequence targeting — invariant
    /// #6) accepts it.
    pub fn render(
        &mut self,
        meta: &FunctionMetadata,
        slot: &EventSlot,
        task_name: &str,
        timestamp: &str,
    ) -> Option<String> {
        match &mut self.state {
            State::Idle => None,
            State::Active(session) => {
                if let Kind::Run(run) = &session.kind {
                    if !belongs_to_run(slot, run) {
                        return None;
                    }
                }
                let return_ready = slot.flags & atrace_proto::FLAG_RETURN_READY != 0;
                if !session.filter.matches(meta, task_name, slot.retval, return_ready) {
                    return None;
                }
                Some(trace_format_event(meta, slot, task_name, timestamp, &mut session.lock_cache))
            }
        }
    }

    /// Forces the session back to IDLE, releasing a RUN session's noise
    /// state and filter claim, without killing its child (which keeps
    /// running untraced). Used when the engine is shutting down
    /// (SPEC_FULL.md §4.5/§7). Returns whether a session was actually
    /// active, so the caller knows whether `# ATRACE SHUTDOWN` is owed.
    pub fn force_idle(&mut self, engine: &Engine) -> bool {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => false,
            State::Active(session) => {
                if let Kind::Run(run) = session.kind {
                    cleanup_run(engine, &run);
                }
                true
            }
        }
    }
}

fn belongs_to_run(slot: &EventSlot, run: &RunState) -> bool {
    slot.caller_task == run.run_task && slot.sequence >= run.run_start_seq
}

fn save_noise_state(engine: &Engine) -> Vec<(&'static str, bool)> {
    let status = engine.status();
    NOISE_FUNCTIONS
        .iter()
        .map(|&name| {
            let enabled = status
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.enabled)
                .unwrap_or(false);
            (name, enabled)
        })
        .collect()
}

fn cleanup_run(engine: &Engine, run: &RunState) {
    for &(name, was_enabled) in &run.noise_save {
        let names = [name.to_string()];
        let _ = if was_enabled {
            engine.enable(Some(&names))
        } else {
            engine.disable(Some(&names))
        };
    }
    if run.owns_filter {
        engine.set_filter_task(None);
    }
}

fn lib_id_from(raw: u8) -> LibId {
    match raw {
        0 => LibId::Exec,
        _ => LibId::Dos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_start_is_rejected_while_active() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        session.start(&engine, "").unwrap();
        let err = session.start(&engine, "").unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive));
    }

    #[test]
    fn idle_session_renders_nothing() {
        let mut session = RunSession::new(32, 16);
        let meta = atrace_proto::lookup_by_name("OpenLibrary").unwrap();
        let slot = atrace_proto::EventSlot::zeroed();
        assert!(session.render(meta, &slot, "shell.1", "00:00:00.000").is_none());
    }

    #[test]
    fn run_without_separator_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        let err = session.start_run(&engine, "ERRORS").unwrap_err();
        assert!(matches!(err, SessionError::MissingCommand));
    }

    #[test]
    fn run_rejects_proc_filter() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        let err = session.start_run(&engine, "PROC=x -- true").unwrap_err();
        assert!(matches!(err, SessionError::Filter(_)));
    }

    #[test]
    fn run_rejects_when_process_table_has_no_slots() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 0);
        let err = session.start_run(&engine, "-- true").unwrap_err();
        assert!(matches!(err, SessionError::ProcessTableFull));
    }

    #[test]
    fn run_spawns_child_and_claims_filter_task() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        session.start_run(&engine, "-- true").unwrap();
        assert!(session.is_active());
        assert!(engine.filter_task().is_some());
    }

    #[test]
    fn poll_completion_reports_exit_code_and_clears_session() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        session.start_run(&engine, "-- true").unwrap();
        let task_names = TaskNameCache::new(8, 50);

        // Give the child a moment to exit; try_wait is non-blocking so
        // poll a few times rather than sleeping a fixed, possibly-flaky
        // amount.
        let mut lines = None;
        for _ in 0..200 {
            if let Some(out) = session.poll_completion(&engine, &task_names, 0, "00:00:00.000") {
                lines = Some(out);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let lines = lines.expect("child should have exited within 2s");
        assert!(lines.iter().any(|l| l == "# PROCESS EXITED rc=0"));
        assert!(!session.is_active());
        assert_eq!(engine.filter_task(), None);
    }

    #[test]
    fn stop_releases_run_session_filter_claim() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        session.start_run(&engine, "-- sleep 1").unwrap();
        assert!(engine.filter_task().is_some());
        session.stop(&engine).unwrap();
        assert_eq!(engine.filter_task(), None);
        assert!(!session.is_active());
    }

    #[test]
    fn force_idle_reports_whether_a_session_was_active() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        assert!(!session.force_idle(&engine));
        session.start(&engine, "").unwrap();
        assert!(session.force_idle(&engine));
        assert!(!session.is_active());
    }
}
