//! Parses and executes one client command line, mirroring
//! `trace_handle_input`'s command set (`STATUS`, `START`, `RUN`, `ENABLE`,
//! `DISABLE`, `STOP`).

use atrace_engine::Engine;

use crate::metrics::Metrics;
use crate::run_session::RunSession;

pub enum DispatchResult {
    Ok(String),
    Err(String),
    Quit,
}

pub fn dispatch(
    engine: &Engine,
    session: &mut RunSession,
    metrics: &Metrics,
    line: &str,
) -> DispatchResult {
    let line = line.trim();
    let mut parts = line.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_ascii_uppercase();
    let rest = parts.next().unwrap_or("").trim();

    match cmd.as_str() {
        "STATUS" => DispatchResult::Ok(status_report(engine, session, metrics)),
        "START" => match session.start(engine, rest) {
            Ok(()) => {
                metrics.start_run_session();
                DispatchResult::Ok("OK streaming started".to_string())
            }
            Err(e) => DispatchResult::Err(e.to_string()),
        },
        "RUN" => match session.start_run(engine, rest) {
            Ok(()) => {
                metrics.start_run_session();
                DispatchResult::Ok("OK run started".to_string())
            }
            Err(e) => DispatchResult::Err(e.to_string()),
        },
        "STOP" => match session.stop(engine) {
            Ok(()) => {
                metrics.complete_run_session();
                DispatchResult::Ok("OK stopped".to_string())
            }
            Err(e) => DispatchResult::Err(e.to_string()),
        },
        "ENABLE" => {
            let names = split_names(rest);
            let target = if names.is_empty() { None } else { Some(names.as_slice()) };
            match engine.enable(target) {
                Ok(()) => DispatchResult::Ok("OK enabled".to_string()),
                Err(e) => DispatchResult::Err(e.to_string()),
            }
        }
        "DISABLE" => {
            let names = split_names(rest);
            let target = if names.is_empty() { None } else { Some(names.as_slice()) };
            match engine.disable(target) {
                Ok(()) => DispatchResult::Ok("OK disabled".to_string()),
                Err(e) => DispatchResult::Err(e.to_string()),
            }
        }
        "QUIT" => DispatchResult::Quit,
        "" => DispatchResult::Err("empty command".to_string()),
        other => DispatchResult::Err(format!("unknown command: {other}")),
    }
}

fn split_names(rest: &str) -> Vec<String> {
    rest.split_whitespace().map(str::to_string).collect()
}

fn status_report(engine: &Engine, session: &RunSession, metrics: &Metrics) -> String {
    let snap = metrics.snapshot();
    let mut out = format!(
        "active={} produced={} consumed={} streamed={} dropped={}",
        session.is_active(),
        engine.events_produced(),
        engine.events_consumed(),
        snap.events_streamed,
        snap.events_dropped
    );
    for report in engine.status() {
        out.push_str(&format!(
            "\n{:<4} {:<16} enabled={}",
            report.lib, report.name, report.enabled
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn run_without_separator_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        let metrics = Metrics::new();
        match dispatch(&engine, &mut session, &metrics, "RUN ERRORS") {
            DispatchResult::Err(msg) => assert!(msg.contains("command")),
            _ => panic!("expected error"),
        }
    }

    #[test]
    fn run_spawns_command_after_separator() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        let metrics = Metrics::new();
        assert!(matches!(
            dispatch(&engine, &mut session, &metrics, "RUN -- true"),
            DispatchResult::Ok(_)
        ));
        assert!(session.is_active());
    }

    #[test]
    fn start_then_stop_round_trips() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        let metrics = Metrics::new();
        assert!(matches!(
            dispatch(&engine, &mut session, &metrics, "START"),
            DispatchResult::Ok(_)
        ));
        assert!(matches!(
            dispatch(&engine, &mut session, &metrics, "STOP"),
            DispatchResult::Ok(_)
        ));
    }

    #[test]
    fn quit_is_recognized() {
        let dir = tempdir().unwrap();
        let engine = Engine::install(&dir.path().join("t.control"), 64).unwrap();
        let mut session = RunSession::new(32, 16);
        let metrics = Metrics::new();
        assert!(matches!(
            dispatch(&engine, &mut session, &metrics, "QUIT"),
            DispatchResult::Quit
        ));
    }
}
