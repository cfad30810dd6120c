// src/observability/mod.rs
//! Logging and metrics setup
//!
//! Both are process-global and installed once from `main`.

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EngineError::Configuration(format!("Invalid log level {:?}: {}", config.level, e)))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| EngineError::Server(format!("Failed to install tracing subscriber: {}", e)))
}

/// Install the Prometheus recorder and return the handle used to render it
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::Server(format!("Failed to install metrics recorder: {}", e)))?;

    metrics::describe_counter!("capture_sessions_started_total", "Capture sessions started");
    metrics::describe_counter!("capture_sessions_failed_total", "Capture sessions that failed to start");
    metrics::describe_counter!("capture_events_delivered_total", "Events handed to a running session");
    metrics::describe_counter!("capture_events_dropped_total", "Stream events dropped on a full queue");
    metrics::describe_counter!("capture_stream_disconnects_total", "Streams ended early by a vanished client or a passed deadline");
    metrics::describe_counter!("capture_archive_bytes_written_total", "Bytes written to archive files");
    metrics::describe_gauge!("capture_active_streams", "Streams currently running");

    Ok(handle)
}

