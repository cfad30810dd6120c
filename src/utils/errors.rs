// src/utils/errors.rs
//! Error taxonomy for capture sessions
//!
//! `Configuration` and `Activation` are raised before any session resource is
//! allocated. `Start` is raised after partial resources have been released.
//! `Transport` never reaches an HTTP client; the streaming pipeline treats it
//! as a cancellation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad request parameters (e.g. a non-positive duration)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An event kind was rejected by the session handle
    #[error("Activation error: {0}")]
    Activation(String),

    /// The session could not begin capturing
    #[error("Start error: {0}")]
    Start(String),

    /// Writing to the outbound client failed mid-stream
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "configuration",
            EngineError::Activation(_) => "activation",
            EngineError::Start(_) => "start",
            EngineError::Transport(_) => "transport",
            EngineError::Storage(_) => "storage",
            EngineError::Compression(_) => "compression",
            EngineError::Server(_) => "server",
            EngineError::Io(_) => "io",
            EngineError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = EngineError::Configuration("duration must be positive".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: duration must be positive"
        );
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(EngineError::Activation("x".into()).kind(), "activation");
        assert_eq!(EngineError::Start("x".into()).kind(), "start");

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(EngineError::from(io).kind(), "io");
    }
}
