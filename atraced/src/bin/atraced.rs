//! Demo daemon: attaches to an already-installed control region, streams
//! formatted trace lines to stdout as they drain, and accepts commands
//! (`STATUS`/`START`/`RUN [CD=path] [filters] -- cmd args...`/`STOP`/
//! `ENABLE`/`DISABLE`/`QUIT`) on stdin. A real deployment would swap the
//! stdin/stdout transport for a socket listener; the command set and
//! session semantics stay the same.

use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use atraced::{Config, DispatchResult, Metrics, Poller, RunSession, TaskNameCache, dispatch, format_timestamp_now};
use atrace_engine::Engine;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "atraced", about = "stream and control atrace events")]
struct Args {
    /// Control-region instance name to attach to.
    #[arg(long, default_value = "atrace")]
    name: String,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Config::load();

    let engine = Arc::new(
        atraced::discovery::attach_with_timeout(&args.name, Duration::from_secs(5))
            .with_context(|| format!("attaching to control region '{}'", args.name))?,
    );
    log::info!("attached to control region at {}", engine.control_path().display());

    let metrics = Arc::new(Metrics::new());
    let session = Arc::new(Mutex::new(RunSession::new(
        atrace_proto::LOCK_PATH_CACHE_SLOTS,
        config.run.max_tracked_procs,
    )));

    let poll_engine = Arc::clone(&engine);
    let poll_metrics = Arc::clone(&metrics);
    let poll_session = Arc::clone(&session);
    let poll_interval = Duration::from_millis(config.daemon.poll_interval_ms);
    std::thread::spawn(move || poll_loop(poll_engine, poll_session, poll_metrics, poll_interval));

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let mut session = session.lock().expect("session mutex poisoned");
        match dispatch(&engine, &mut session, &metrics, &line) {
            DispatchResult::Ok(msg) => println!("{msg}"),
            DispatchResult::Err(msg) => println!("ERR {msg}"),
            DispatchResult::Quit => {
                drop(session);
                break;
            }
        }
    }

    log::info!("shutting down");
    Ok(())
}

fn poll_loop(
    engine: Arc<Engine>,
    session: Arc<Mutex<RunSession>>,
    metrics: Arc<Metrics>,
    interval: Duration,
) {
    let mut poller = Poller::new(atrace_proto::POLL_BATCH_SIZE);
    let task_names = TaskNameCache::new(atrace_proto::TASK_CACHE_SIZE, atrace_proto::TASK_CACHE_REFRESH_POLLS);

    loop {
        std::thread::sleep(interval);

        // The control region's backing file disappears only when the
        // engine tears down (`Engine::quit`). Losing it mid-session means
        // the engine is shutting down out from under us (SPEC_FULL.md
        // §4.5/§7) — `global_enable()` alone can't distinguish that from
        // an ordinary DISABLE command, so file presence is the signal.
        if !engine.control_path().exists() {
            let mut session = session.lock().expect("session mutex poisoned");
            if session.force_idle(&engine) {
                println!("# ATRACE SHUTDOWN");
            }
            drop(session);
            log::info!("control region gone, stopping poll loop");
            return;
        }

        let (events, dropped) = poller.poll(&engine);
        let timestamp = format_timestamp_now();

        let mut session = session.lock().expect("session mutex poisoned");

        if dropped > 0 {
            metrics.record_dropped(dropped as u64);
            log::warn!("ring overflow: {dropped} events dropped since last poll");
            if session.is_active() {
                println!("# OVERFLOW {dropped} events dropped");
            }
        }

        for slot in &events {
            let Some(meta) = atrace_proto::lookup_by_lib_lvo(lib_id_from(slot.lib_id), slot.lvo) else {
                continue;
            };
            let task_name = task_names.name_for(slot.caller_task, poller.cycle());
            if let Some(line) = session.render(meta, slot, &task_name, &timestamp) {
                println!("{line}");
                metrics.record_streamed(1);
            }
        }

        if let Some(lines) = session.poll_completion(&engine, &task_names, poller.cycle(), &timestamp) {
            metrics.complete_run_session();
            for line in lines {
                println!("{line}");
                metrics.record_streamed(1);
            }
        }

        drop(session);
        metrics.record_poll_cycle();
    }
}

fn lib_id_from(raw: u8) -> atrace_proto::LibId {
    match raw {
        0 => atrace_proto::LibId::Exec,
        _ => atrace_proto::LibId::Dos,
    }
}
