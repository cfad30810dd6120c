// src/instrumentation/event.rs
//! Captured events and the sensitivity rules that admit them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A single instrumentation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// Event kind identifier (e.g. `runtime.CPULoad`)
    pub kind: String,

    /// When the event was committed
    pub timestamp: DateTime<Utc>,

    /// How long the measured operation took, for duration events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<u64>,

    /// Name of the thread that produced the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,

    /// Event fields
    pub payload: serde_json::Value,
}

impl CapturedEvent {
    /// Create an instant event stamped with the current time
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            duration_us: None,
            thread: None,
            payload,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_us = Some(duration.as_micros() as u64);
        self
    }

    pub fn with_thread(mut self, name: impl Into<String>) -> Self {
        self.thread = Some(name.into());
        self
    }

    /// Tag the event with the calling thread's name, if it has one
    pub fn on_current_thread(self) -> Self {
        match std::thread::current().name() {
            Some(name) => self.with_thread(name),
            None => self,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_us.map(Duration::from_micros)
    }
}

/// When an enabled event kind is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    /// Duration events shorter than the threshold are discarded
    Threshold(Duration),

    /// The kind is sampled by a periodic hook at this interval
    Period(Duration),

    /// Every occurrence is recorded
    Unconditional,
}

impl Sensitivity {
    /// Whether an event of an enabled kind passes this rule.
    ///
    /// Instant events carry no duration and are never filtered by a threshold.
    pub fn admits(&self, event: &CapturedEvent) -> bool {
        match self {
            Sensitivity::Threshold(threshold) => match event.duration() {
                Some(duration) => duration >= *threshold,
                None => true,
            },
            Sensitivity::Period(_) | Sensitivity::Unconditional => true,
        }
    }

    pub fn period(&self) -> Option<Duration> {
        match self {
            Sensitivity::Period(period) => Some(*period),
            _ => None,
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensitivity::Threshold(d) => write!(f, "threshold={}ms", d.as_millis()),
            Sensitivity::Period(d) => write!(f, "period={}ms", d.as_millis()),
            Sensitivity::Unconditional => write!(f, "unconditional"),
        }
    }
}

/// One row of a capture table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKindSpec {
    pub kind: String,
    pub sensitivity: Sensitivity,
}

impl EventKindSpec {
    pub fn threshold(kind: impl Into<String>, threshold: Duration) -> Self {
        Self {
            kind: kind.into(),
            sensitivity: Sensitivity::Threshold(threshold),
        }
    }

    pub fn period(kind: impl Into<String>, period: Duration) -> Self {
        Self {
            kind: kind.into(),
            sensitivity: Sensitivity::Period(period),
        }
    }

    pub fn unconditional(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            sensitivity: Sensitivity::Unconditional,
        }
    }
}
