// src/instrumentation/mod.rs
//! Instrumentation source
//!
//! The event producer side of the engine:
//!
//! - **Catalog**: known event kinds and the default capture table
//! - **Flight Recorder**: process-wide hub events are committed to
//! - **Session**: recording handles that filter, hand off and persist events
//! - **Probes**: built-in CPU load and sleep producers
//!
//! # Architecture
//!
//! ```text
//! producer ─commit()─▶ FlightRecorder ─┬─▶ Recording (archive) ─▶ chunk writer ─▶ file
//!                                      └─▶ Recording (stream)  ─▶ handler ─▶ queue
//! periodic hook ◀─sampler task── Recording (period-mode kinds)
//! ```

pub mod catalog;
pub mod event;
pub mod flight_recorder;
pub mod probes;
pub mod session;

// Re-export commonly used types
pub use catalog::{CaptureTable, EventCatalog, EventType};
pub use event::{CapturedEvent, EventKindSpec, Sensitivity};
pub use flight_recorder::{FlightRecorder, PeriodicHook};
pub use probes::{timed_sleep, CpuLoadProbe};
pub use session::{CaptureSession, EventHandler, Recording, SessionInfo, SessionMode, SessionStatus};
