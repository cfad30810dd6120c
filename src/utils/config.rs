// src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional file,
//! then `CAPTURE__SECTION__KEY` environment variables.

use crate::recording::compressor::CompressionLevel;
use crate::recording::event_queue::BackpressurePolicy;
use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "CAPTURE_ENGINE_CONFIG";

/// Config file looked up when `CAPTURE_ENGINE_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "capture-engine.toml";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub archive: ArchiveConfig,
    pub streaming: StreamingConfig,
    pub demo: DemoConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Archive recording settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory archive files are written into
    pub output_dir: PathBuf,

    /// File name prefix, followed by `-<id>`
    pub file_prefix: String,

    /// File extension (without the dot)
    pub extension: String,

    /// Events per compressed chunk
    pub batch_size: usize,

    /// Maximum time an event waits in memory before its chunk is written
    pub flush_interval_ms: u64,

    /// Capacity of the queue feeding the chunk writer
    pub queue_capacity: usize,

    /// Chunk compression level
    pub compression: CompressionLevel,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "recording".to_string(),
            extension: "cap".to_string(),
            batch_size: 256,
            flush_interval_ms: 1000,
            queue_capacity: 8192,
            compression: CompressionLevel::Balanced,
        }
    }
}

impl ArchiveConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Live streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Capacity of the per-session event queue
    pub queue_capacity: usize,

    /// What a producer does when the queue is full
    pub backpressure: BackpressurePolicy,

    /// Margin added to the capture duration for the response deadline
    pub grace_period_secs: u64,

    /// Idle interval after which an SSE comment is written to the client
    pub keep_alive_ms: u64,

    /// Frames buffered between the consumer and the HTTP body
    pub outbound_buffer: usize,

    /// Streams allowed to run at once
    pub max_concurrent_streams: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backpressure: BackpressurePolicy::Block,
            grace_period_secs: 10,
            keep_alive_ms: 15_000,
            outbound_buffer: 16,
            max_concurrent_streams: 4,
        }
    }
}

impl StreamingConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

/// Guess game settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Fixed target; random in `1..=10` when unset
    pub target: Option<i64>,

    /// Only guesses deviating by more than this many percent are recorded
    pub deviation_filter: Option<i64>,

    /// Instrumented pause before each answer, `0` to disable
    pub answer_delay_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            target: None,
            deviation_filter: None,
            answer_delay_ms: 5,
        }
    }
}

impl DemoConfig {
    pub fn answer_delay(&self) -> Duration {
        Duration::from_millis(self.answer_delay_ms)
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file location and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(path)
    }

    /// Load configuration from a specific (optional) file and environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("CAPTURE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.archive.file_prefix, "recording");
        assert_eq!(config.streaming.grace_period(), Duration::from_secs(10));
        assert_eq!(config.streaming.backpressure, BackpressurePolicy::Block);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.demo.target, None);
        assert_eq!(config.demo.answer_delay(), Duration::from_millis(5));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.streaming.queue_capacity, 1024);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[archive]
output_dir = "/var/lib/capture"
compression = "best"

[streaming]
queue_capacity = 16
backpressure = "drop"

[demo]
target = 3
deviation_filter = 20
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.archive.output_dir, PathBuf::from("/var/lib/capture"));
        assert!(matches!(config.archive.compression, CompressionLevel::Best));
        assert_eq!(config.streaming.queue_capacity, 16);
        assert_eq!(config.streaming.backpressure, BackpressurePolicy::Drop);
        assert_eq!(config.streaming.grace_period_secs, 10);
        assert_eq!(config.demo.target, Some(3));
        assert_eq!(config.demo.deviation_filter, Some(20));
        assert_eq!(config.demo.answer_delay_ms, 5);
    }
}
