// src/instrumentation/flight_recorder.rs
//! Process-wide event hub
//!
//! Producers commit events here; the hub fans each event out to every running
//! [`Recording`] that has its kind enabled. Periodic event kinds are sampled
//! through hooks registered with [`FlightRecorder::add_periodic_hook`].
//!
//! The hub is created once at startup and shared through `Arc`.

use crate::instrumentation::catalog::EventCatalog;
use crate::instrumentation::event::CapturedEvent;
use crate::instrumentation::session::{CaptureSession, Recording, SessionInfo, SessionMode};
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Produces the payload of a periodic event, or `None` to skip a sample
pub type PeriodicHook = Arc<dyn Fn() -> Option<serde_json::Value> + Send + Sync>;

pub struct FlightRecorder {
    catalog: EventCatalog,
    active: DashMap<(SessionMode, u64), Arc<Recording>>,
    periodic: RwLock<HashMap<String, PeriodicHook>>,
    committed: AtomicU64,
}

impl FlightRecorder {
    pub fn new(catalog: EventCatalog) -> Self {
        Self {
            catalog,
            active: DashMap::new(),
            periodic: RwLock::new(HashMap::new()),
            committed: AtomicU64::new(0),
        }
    }

    pub fn with_builtin_catalog() -> Self {
        Self::new(EventCatalog::builtin())
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    /// Create a session bound to this hub
    pub fn new_recording(
        self: &Arc<Self>,
        id: u64,
        mode: SessionMode,
        name: impl Into<String>,
    ) -> Arc<Recording> {
        Recording::new(Arc::clone(self), id, mode, name.into())
    }

    /// Register the sampler for a periodic event kind
    pub fn add_periodic_hook<F>(&self, kind: &str, hook: F) -> Result<()>
    where
        F: Fn() -> Option<serde_json::Value> + Send + Sync + 'static,
    {
        if !self.catalog.contains(kind) {
            return Err(EngineError::Activation(format!(
                "Cannot add periodic hook for unknown event kind {}",
                kind
            )));
        }
        self.periodic.write().insert(kind.to_string(), Arc::new(hook));
        debug!("Periodic hook registered for {}", kind);
        Ok(())
    }

    pub(crate) fn periodic_hook(&self, kind: &str) -> Option<PeriodicHook> {
        self.periodic.read().get(kind).cloned()
    }

    /// Offer an event to every running session.
    ///
    /// May block while a session's queue is full. Returns the number of
    /// sessions that accepted the event.
    pub fn commit(&self, event: CapturedEvent) -> usize {
        self.committed.fetch_add(1, Ordering::Relaxed);

        // snapshot so no map shard stays locked during delivery
        let sessions: Vec<Arc<Recording>> = self
            .active
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        sessions
            .iter()
            .filter(|recording| recording.deliver(&event))
            .count()
    }

    /// Whether any running session would accept events of `kind`.
    ///
    /// Producers check this before building an event.
    pub fn is_enabled(&self, kind: &str) -> bool {
        self.active.iter().any(|entry| entry.value().is_enabled(kind))
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.active.iter().map(|entry| entry.value().info()).collect();
        sessions.sort_by_key(|info| (info.mode, info.id));
        sessions
    }

    pub(crate) fn register(&self, recording: Arc<Recording>) {
        self.active.insert((recording.mode(), recording.id()), recording);
    }

    pub(crate) fn unregister(&self, mode: SessionMode, id: u64) {
        self.active.remove(&(mode, id));
    }
}

impl Default for FlightRecorder {
    fn default() -> Self {
        Self::with_builtin_catalog()
    }
}
