// src/main.rs
//! Capture Engine
//!
//! Serves archive recordings and live event streams over HTTP.

use anyhow::Result;
use capture_engine::instrumentation::{CpuLoadProbe, FlightRecorder};
use capture_engine::observability::{init_metrics, init_tracing};
use capture_engine::server::CaptureServer;
use capture_engine::utils::config::EngineConfig;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load()?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    let metrics = init_metrics()?;

    info!("Starting Capture Engine v{}", capture_engine::VERSION);
    info!("Configuration loaded: {:?}", config);

    // One hub for the whole process
    let recorder = Arc::new(FlightRecorder::with_builtin_catalog());
    CpuLoadProbe::new().install(&recorder)?;

    let server = Arc::new(CaptureServer::from_config(
        Arc::clone(&recorder),
        &config,
        Some(metrics),
    ));
    server.game().install()?;

    let listener = CaptureServer::bind(&config.server).await?;

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    match server.serve(listener, shutdown_signal).await {
        Ok(()) => {
            for session in recorder.active_sessions() {
                info!("{} was still {} at shutdown", session.name, session.status);
            }
            info!("Server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}
