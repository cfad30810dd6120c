// src/instrumentation/catalog.rs
//! Known event kinds and the capture table applied to every session

use crate::instrumentation::event::EventKindSpec;
use crate::utils::errors::{EngineError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub const ALLOCATION_IN_NEW_BUFFER: &str = "runtime.ObjectAllocationInNewBuffer";
pub const ALLOCATION_OUTSIDE_BUFFER: &str = "runtime.ObjectAllocationOutsideBuffer";
pub const GARBAGE_COLLECTION: &str = "runtime.GarbageCollection";
pub const CPU_LOAD: &str = "runtime.CPULoad";
pub const THREAD_SLEEP: &str = "runtime.ThreadSleep";
pub const USER_GUESS: &str = "demo.UserGuess";
pub const TARGET_NUMBER: &str = "demo.TargetNumber";

/// Human-readable metadata for an event kind
#[derive(Debug, Clone, Serialize)]
pub struct EventType {
    pub name: &'static str,
    pub label: &'static str,
    pub category: &'static str,
    pub description: &'static str,
}

/// Registry of event kinds a session may enable
#[derive(Debug, Clone)]
pub struct EventCatalog {
    types: HashMap<&'static str, EventType>,
}

impl EventCatalog {
    pub fn new(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            types: types.into_iter().map(|t| (t.name, t)).collect(),
        }
    }

    /// The runtime and demo event kinds
    pub fn builtin() -> Self {
        Self::new([
            EventType {
                name: ALLOCATION_IN_NEW_BUFFER,
                label: "Allocation in new buffer",
                category: "Runtime/Memory",
                description: "Allocation that required a fresh thread-local buffer",
            },
            EventType {
                name: ALLOCATION_OUTSIDE_BUFFER,
                label: "Allocation outside buffer",
                category: "Runtime/Memory",
                description: "Allocation served directly from the shared heap",
            },
            EventType {
                name: GARBAGE_COLLECTION,
                label: "Garbage collection",
                category: "Runtime/Memory",
                description: "A collection or compaction pause",
            },
            EventType {
                name: CPU_LOAD,
                label: "CPU load",
                category: "Runtime/Processor",
                description: "Process CPU usage sampled over the last period",
            },
            EventType {
                name: THREAD_SLEEP,
                label: "Thread sleep",
                category: "Runtime/Threads",
                description: "Time a thread spent in an instrumented sleep",
            },
            EventType {
                name: USER_GUESS,
                label: "User guess",
                category: "Demo",
                description: "A guess submitted to the number guessing game",
            },
            EventType {
                name: TARGET_NUMBER,
                label: "Target number reveal",
                category: "Demo",
                description: "The number the guessing game is waiting for",
            },
        ])
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    pub fn get(&self, kind: &str) -> Option<&EventType> {
        self.types.get(kind)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Event kinds and sensitivities activated for every capture session.
///
/// Each kind appears exactly once.
#[derive(Debug, Clone)]
pub struct CaptureTable {
    entries: Vec<EventKindSpec>,
}

impl CaptureTable {
    pub fn new(entries: Vec<EventKindSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.kind.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "Event kind {} appears more than once in the capture table",
                    entry.kind
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[EventKindSpec] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CaptureTable {
    fn default() -> Self {
        Self {
            entries: vec![
                EventKindSpec::threshold(ALLOCATION_IN_NEW_BUFFER, Duration::from_millis(1)),
                EventKindSpec::threshold(ALLOCATION_OUTSIDE_BUFFER, Duration::from_millis(1)),
                EventKindSpec::threshold(GARBAGE_COLLECTION, Duration::from_millis(10)),
                EventKindSpec::period(CPU_LOAD, Duration::from_millis(500)),
                EventKindSpec::threshold(THREAD_SLEEP, Duration::from_millis(1)),
                EventKindSpec::unconditional(USER_GUESS),
                EventKindSpec::period(TARGET_NUMBER, Duration::from_secs(1)),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::event::Sensitivity;

    #[test]
    fn test_default_table_is_known_to_catalog() {
        let catalog = EventCatalog::builtin();
        let table = CaptureTable::default();

        assert_eq!(table.len(), 7);
        for entry in table.entries() {
            assert!(catalog.contains(&entry.kind), "{} missing", entry.kind);
        }
        // default table passes its own validation
        assert!(CaptureTable::new(table.entries().to_vec()).is_ok());
    }

    #[test]
    fn test_default_sensitivities() {
        let table = CaptureTable::default();
        let lookup = |kind: &str| {
            table
                .entries()
                .iter()
                .find(|e| e.kind == kind)
                .map(|e| e.sensitivity)
                .unwrap()
        };

        assert_eq!(
            lookup(GARBAGE_COLLECTION),
            Sensitivity::Threshold(Duration::from_millis(10))
        );
        assert_eq!(lookup(CPU_LOAD), Sensitivity::Period(Duration::from_millis(500)));
        assert_eq!(lookup(USER_GUESS), Sensitivity::Unconditional);
        assert_eq!(lookup(TARGET_NUMBER), Sensitivity::Period(Duration::from_secs(1)));
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let result = CaptureTable::new(vec![
            EventKindSpec::unconditional(USER_GUESS),
            EventKindSpec::threshold(USER_GUESS, Duration::from_millis(5)),
        ]);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = EventCatalog::builtin();
        assert_eq!(catalog.get(CPU_LOAD).unwrap().category, "Runtime/Processor");
        assert!(catalog.get("runtime.Unknown").is_none());
        assert!(!catalog.is_empty());
    }
}
