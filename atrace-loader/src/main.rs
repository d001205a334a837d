//! Thin CLI over `atrace-engine`'s control region, mirroring the original
//! loader's `TEMPLATE "BUFSZ/K/N,DISABLE/S,STATUS/S,ENABLE/S,QUIT/S,FUNCS/M"`
//! as clap subcommands instead of AmigaDOS `ReadArgs` keywords.

use anyhow::{Context, Result};
use atrace_engine::Engine;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "atrace-loader", about = "install and control the atrace engine")]
struct Args {
    /// Control-region instance name; determines its well-known path.
    #[arg(long, default_value = "atrace")]
    name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install a fresh control region. Fails if one already exists.
    Install {
        #[arg(long, default_value_t = atrace_proto::DEFAULT_RING_CAPACITY)]
        bufsz: u32,
    },
    /// Print per-function enable state and ring counters.
    Status,
    /// Enable tracing globally, or for specific function names.
    Enable { funcs: Vec<String> },
    /// Disable tracing globally, or for specific function names.
    Disable { funcs: Vec<String> },
    /// Tear down the control region and reclaim its backing file.
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let path = atrace_engine::control_path(&args.name);

    match args.command {
        Command::Install { bufsz } => {
            let engine = Engine::install(&path, bufsz)
                .with_context(|| format!("installing control region at {}", path.display()))?;
            log::info!("installed control region at {}", engine.control_path().display());
            println!("installed: {}", engine.control_path().display());
        }
        Command::Status => {
            let engine = Engine::attach(&path)
                .with_context(|| format!("attaching to control region at {}", path.display()))?;
            println!(
                "ring: produced={} consumed={}",
                engine.events_produced(),
                engine.events_consumed()
            );
            match engine.filter_task() {
                Some(t) => println!("task filter: {t}"),
                None => println!("task filter: none"),
            }
            for report in engine.status() {
                println!(
                    "{:<4} {:<16} lvo={:<5} enabled={} in_flight={}",
                    report.lib, report.name, report.lvo, report.enabled, report.in_flight
                );
            }
        }
        Command::Enable { funcs } => {
            let engine = Engine::attach(&path)
                .with_context(|| format!("attaching to control region at {}", path.display()))?;
            let target = if funcs.is_empty() { None } else { Some(funcs.as_slice()) };
            engine.enable(target).context("enabling")?;
            println!("enabled: {}", describe_target(target));
        }
        Command::Disable { funcs } => {
            let engine = Engine::attach(&path)
                .with_context(|| format!("attaching to control region at {}", path.display()))?;
            let target = if funcs.is_empty() { None } else { Some(funcs.as_slice()) };
            engine.disable(target).context("disabling")?;
            println!("disabled: {}", describe_target(target));
        }
        Command::Quit => {
            let engine = Engine::attach(&path)
                .with_context(|| format!("attaching to control region at {}", path.display()))?;
            engine.quit().context("tearing down control region")?;
            println!("torn down: {}", path.display());
        }
    }

    Ok(())
}

fn describe_target(target: Option<&[String]>) -> String {
    match target {
        None => "globally".to_string(),
        Some(names) => names.join(", "),
    }
}
