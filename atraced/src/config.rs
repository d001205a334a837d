//! Daemon configuration, loaded from TOML with an env-var override path and
//! a graceful fallback to defaults on any parse error — the same shape
//! `cognitod`'s config loader uses.

use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/atrace/atraced.toml";
const CONFIG_ENV_VAR: &str = "ATRACED_CONFIG";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub run: RunConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            run: RunConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DaemonConfig {
    pub control_name: String,
    pub poll_interval_ms: u64,
    pub ring_capacity: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            control_name: default_control_name(),
            poll_interval_ms: default_poll_interval_ms(),
            ring_capacity: atrace_proto::DEFAULT_RING_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunConfig {
    pub max_tracked_procs: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_tracked_procs: default_max_tracked_procs(),
        }
    }
}

fn default_control_name() -> String {
    "atrace".to_string()
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_max_tracked_procs() -> usize {
    16
}

impl Config {
    /// Load from `$ATRACED_CONFIG` if set, else `/etc/atrace/atraced.toml`,
    /// falling back to defaults if the file is missing or fails to parse.
    pub fn load() -> Self {
        let path = config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::warn!("failed to parse config at {}: {e}, using defaults", path.display());
                    Config::default()
                }
            },
            Err(e) => {
                log::info!("no config at {} ({e}), using defaults", path.display());
                Config::default()
            }
        }
    }
}

fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_defaults() {
        let toml_str = r#"
            [daemon]
            control_name = "myinst"
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.daemon.control_name, "myinst");
        assert_eq!(cfg.daemon.poll_interval_ms, 200);
        assert_eq!(cfg.run.max_tracked_procs, 16);
    }

    #[test]
    fn env_override() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[run]\nmax_tracked_procs = 4\n").unwrap();
        unsafe {
            std::env::set_var(CONFIG_ENV_VAR, file.path());
        }
        let cfg = Config::load();
        assert_eq!(cfg.run.max_tracked_procs, 4);
        unsafe {
            std::env::remove_var(CONFIG_ENV_VAR);
        }
    }
}
