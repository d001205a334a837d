//! Client-side attach to an already-installed control region, by name
//! rather than by `FindSemaphore()`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use atrace_engine::{Engine, EngineError};

/// Attach immediately, failing if no control region exists yet at this
/// name's well-known path.
pub fn attach(name: &str) -> Result<Engine, EngineError> {
    Engine::attach(&control_path(name))
}

/// Poll for a control region to appear, up to `timeout`. Useful when the
/// daemon starts before the loader has installed the engine.
pub fn attach_with_timeout(name: &str, timeout: Duration) -> Result<Engine, EngineError> {
    let path = control_path(name);
    let deadline = Instant::now() + timeout;
    loop {
        match Engine::attach(&path) {
            Ok(engine) => return Ok(engine),
            Err(e) if Instant::now() < deadline => {
                log::debug!("control region not ready yet: {e}");
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(e),
        }
    }
}

fn control_path(name: &str) -> PathBuf {
    atrace_engine::control_path(name)
}
