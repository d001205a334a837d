//! Daemon-side tracing: control-region discovery, the ring poller,
//! filtering, formatting, and RUN-session management layered on top of
//! `atrace-engine`.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod filter;
pub mod formatter;
pub mod metrics;
pub mod poller;
pub mod run_session;
pub mod taskcache;

pub use config::Config;
pub use dispatch::{DispatchResult, dispatch};
pub use filter::ClientFilter;
pub use formatter::{LockPathCache, format_timestamp_now, trace_format_event};
pub use metrics::Metrics;
pub use poller::Poller;
pub use run_session::RunSession;
pub use taskcache::TaskNameCache;
