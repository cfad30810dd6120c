// src/capture/mod.rs
//! Capture modes
//!
//! - **Configurator**: validates a duration and enables the capture table
//! - **Archive**: bounded recordings persisted to a file
//! - **Streaming**: bounded recordings delivered live over SSE

pub mod archive;
pub mod configurator;
pub mod sse;
pub mod streaming;

pub use archive::{ArchiveRecorder, ArchiveTicket};
pub use configurator::{validate_duration, SessionConfigurator};
pub use streaming::{EventStream, PipelineState, StreamHandle, StreamItem, StreamSession, StreamingPipeline};
