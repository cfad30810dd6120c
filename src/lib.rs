// src/lib.rs
//! Capture Engine Library
//!
//! Bounded runtime event capture: record a process's instrumentation events
//! for a fixed duration, either into an archive file or live to an HTTP
//! client as server-sent events.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **instrumentation**: Event catalog, the flight recorder hub, recording sessions, probes
//! - **recording**: Bounded event queue, chunk compression, archive file writer
//! - **capture**: Session configurator, archive recorder, streaming pipeline
//! - **server**: HTTP routes and the demo guess game
//! - **observability**: Logging and metrics setup
//! - **utils**: Configuration and errors

// Public module exports
pub mod capture;
pub mod instrumentation;
pub mod observability;
pub mod recording;
pub mod server;
pub mod utils;

// Re-export commonly used types
pub use capture::{ArchiveRecorder, SessionConfigurator, StreamingPipeline};
pub use instrumentation::{CaptureSession, CapturedEvent, FlightRecorder, Recording};
pub use server::CaptureServer;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
