use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// Ring is full; the caller should treat this as an overflow, not a
    /// hard failure (the producer drops the event and keeps going).
    RingFull,
    UnknownFunction(String),
    AlreadyInstalled,
    NotInstalled,
    ControlRegionCorrupt(&'static str),
    Io(std::io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::RingFull => write!(f, "ring buffer is full"),
            EngineError::UnknownFunction(name) => write!(f, "unknown function: {name}"),
            EngineError::AlreadyInstalled => write!(f, "engine already installed"),
            EngineError::NotInstalled => write!(f, "engine not installed"),
            EngineError::ControlRegionCorrupt(why) => write!(f, "control region corrupt: {why}"),
            EngineError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
