// src/instrumentation/session.rs
//! Recording sessions
//!
//! A [`Recording`] is the handle through which a capture session is
//! configured, started and stopped. Matching events committed to the
//! [`FlightRecorder`] are handed to the session's handlers, and optionally
//! persisted to an archive file, while the session is running.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start()──▶ Running ──stop()──▶ Stopping ──close()──▶ Closed
//!    └───────────────────────close()──────────────────────────────┘
//! ```
//!
//! Delivery holds the state read lock for the whole hand-off, and `stop()`
//! takes the write lock to leave `Running`. Once `stop()` returns, no handler
//! runs again.

use crate::instrumentation::event::{CapturedEvent, Sensitivity};
use crate::instrumentation::flight_recorder::{FlightRecorder, PeriodicHook};
use crate::recording::chunk_writer::{ArchiveHeader, ChunkWriter, ChunkWriterConfig};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Callback invoked once per matching event
pub type EventHandler = Box<dyn Fn(&CapturedEvent) + Send + Sync>;

/// Where a session's events go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Archive,
    Stream,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Archive => "archive",
            SessionMode::Stream => "stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Running,
    Stopping,
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Capabilities a capture session offers to its owner
pub trait CaptureSession: Send + Sync {
    fn id(&self) -> u64;

    /// Activate an event kind. Only allowed before `start()`.
    fn enable(&self, kind: &str, sensitivity: Sensitivity) -> Result<()>;

    /// Register a callback for matching events. Only allowed before `start()`.
    fn on_event(&self, handler: EventHandler) -> Result<()>;

    fn start(&self) -> Result<()>;

    /// Stop accepting events and release capture resources.
    ///
    /// Returns `Ok(false)` if the session was not running.
    fn stop(&self) -> Result<bool>;

    /// Stop if needed and mark the session closed. Idempotent.
    fn close(&self);

    fn status(&self) -> SessionStatus;
}

#[derive(Debug, Clone, Default)]
struct RecordingOptions {
    duration: Option<Duration>,
    destination: Option<PathBuf>,
    to_disk: bool,
    writer: ChunkWriterConfig,
}

/// Snapshot of a session for listings
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub name: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    pub destination: Option<PathBuf>,
    pub events_delivered: u64,
    pub settings: BTreeMap<String, String>,
}

/// Capture session handle
pub struct Recording {
    id: u64,
    name: String,
    mode: SessionMode,
    hub: Arc<FlightRecorder>,
    me: Weak<Recording>,
    state: RwLock<SessionStatus>,
    settings: RwLock<HashMap<String, Sensitivity>>,
    handlers: RwLock<Vec<EventHandler>>,
    options: Mutex<RecordingOptions>,
    writer: Mutex<Option<ChunkWriter>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    delivered: AtomicU64,
    cancel: CancellationToken,
}

impl Recording {
    pub(crate) fn new(hub: Arc<FlightRecorder>, id: u64, mode: SessionMode, name: String) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            name,
            mode,
            hub,
            me: me.clone(),
            state: RwLock::new(SessionStatus::Created),
            settings: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            options: Mutex::new(RecordingOptions::default()),
            writer: Mutex::new(None),
            started_at: Mutex::new(None),
            delivered: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Stop automatically once `duration` has elapsed after `start()`
    pub fn set_duration(&self, duration: Duration) {
        self.options.lock().duration = Some(duration);
    }

    /// Archive file written when disk persistence is enabled
    pub fn set_destination(&self, destination: impl Into<PathBuf>) {
        self.options.lock().destination = Some(destination.into());
    }

    pub fn set_to_disk(&self, to_disk: bool) {
        self.options.lock().to_disk = to_disk;
    }

    pub fn set_writer_config(&self, config: ChunkWriterConfig) {
        self.options.lock().writer = config;
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock()
    }

    pub fn events_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Enabled kinds and their sensitivity
    pub fn settings(&self) -> BTreeMap<String, Sensitivity> {
        self.settings
            .read()
            .iter()
            .map(|(kind, sensitivity)| (kind.clone(), *sensitivity))
            .collect()
    }

    /// Whether the session is running with `kind` enabled
    pub fn is_enabled(&self, kind: &str) -> bool {
        *self.state.read() == SessionStatus::Running && self.settings.read().contains_key(kind)
    }

    /// Hand an event to the session's handlers if it is running and the
    /// event passes the kind's sensitivity. Returns whether it was accepted.
    pub fn deliver(&self, event: &CapturedEvent) -> bool {
        let state = self.state.read();
        if *state != SessionStatus::Running {
            return false;
        }

        let admitted = self
            .settings
            .read()
            .get(&event.kind)
            .map(|sensitivity| sensitivity.admits(event))
            .unwrap_or(false);
        if !admitted {
            return false;
        }

        for handler in self.handlers.read().iter() {
            handler(event);
        }
        drop(state);

        self.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("capture_events_delivered_total", "mode" => self.mode.as_str()).increment(1);
        true
    }

    pub fn info(&self) -> SessionInfo {
        let options = self.options.lock().clone();
        SessionInfo {
            id: self.id,
            name: self.name.clone(),
            mode: self.mode,
            status: self.status(),
            started_at: self.started_at(),
            duration_secs: options.duration.map(|d| d.as_secs()),
            destination: options.destination,
            events_delivered: self.events_delivered(),
            settings: self
                .settings()
                .into_iter()
                .map(|(kind, sensitivity)| (kind, sensitivity.to_string()))
                .collect(),
        }
    }

    fn open_archive(&self, options: &RecordingOptions, started_at: DateTime<Utc>) -> Result<()> {
        let destination = options.destination.clone().ok_or_else(|| {
            EngineError::Start(format!("Recording #{} has no destination", self.id))
        })?;

        let header = ArchiveHeader {
            id: self.id,
            name: self.name.clone(),
            started_at,
            duration_secs: options.duration.map(|d| d.as_secs()),
            settings: self
                .settings()
                .into_iter()
                .map(|(kind, sensitivity)| (kind, sensitivity.to_string()))
                .collect(),
        };

        let (writer, producer) = ChunkWriter::create(&destination, header, options.writer.clone())?;
        let id = self.id;
        self.handlers.write().push(Box::new(move |event| {
            if producer.push(event.clone()).is_err() {
                debug!("Archive writer for recording #{} is gone, event discarded", id);
            }
        }));
        *self.writer.lock() = Some(writer);
        Ok(())
    }
}

impl CaptureSession for Recording {
    fn id(&self) -> u64 {
        self.id
    }

    fn enable(&self, kind: &str, sensitivity: Sensitivity) -> Result<()> {
        if !self.hub.catalog().contains(kind) {
            return Err(EngineError::Activation(format!("Unknown event kind {}", kind)));
        }

        let state = self.state.read();
        if *state != SessionStatus::Created {
            return Err(EngineError::Activation(format!(
                "Cannot enable {} on recording #{} while {}",
                kind, self.id, *state
            )));
        }

        self.settings.write().insert(kind.to_string(), sensitivity);
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) -> Result<()> {
        let state = self.state.read();
        if *state != SessionStatus::Created {
            return Err(EngineError::Activation(format!(
                "Cannot register a handler on recording #{} while {}",
                self.id, *state
            )));
        }
        self.handlers.write().push(handler);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.write();
        if *state != SessionStatus::Created {
            return Err(EngineError::Start(format!(
                "Recording #{} is already {}",
                self.id, *state
            )));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            EngineError::Start("Recordings must be started inside a tokio runtime".to_string())
        })?;

        let options = self.options.lock().clone();
        let started_at = Utc::now();

        if options.to_disk {
            self.open_archive(&options, started_at)?;
        }

        for (kind, sensitivity) in self.settings() {
            let Some(period) = sensitivity.period() else {
                continue;
            };
            if let Some(hook) = self.hub.periodic_hook(&kind) {
                runtime.spawn(sample_periodically(
                    self.me.clone(),
                    kind,
                    period,
                    hook,
                    self.cancel.clone(),
                ));
            }
        }

        if let Some(duration) = options.duration {
            runtime.spawn(stop_after(self.me.clone(), duration, self.cancel.clone()));
        }

        *self.started_at.lock() = Some(started_at);
        *state = SessionStatus::Running;
        drop(state);

        if let Some(me) = self.me.upgrade() {
            self.hub.register(me);
        }

        info!(
            "{} started ({}, {} event kinds)",
            self.name,
            self.mode.as_str(),
            self.settings.read().len()
        );
        Ok(())
    }

    fn stop(&self) -> Result<bool> {
        {
            let mut state = self.state.write();
            if *state != SessionStatus::Running {
                return Ok(false);
            }
            *state = SessionStatus::Stopping;
        }

        self.cancel.cancel();
        self.hub.unregister(self.mode, self.id);

        // dropping the handlers disconnects any archive writer queue
        let handlers = std::mem::take(&mut *self.handlers.write());
        drop(handlers);

        info!("{} stopped after {} events", self.name, self.events_delivered());

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let summary = writer.finish()?;
            debug!(
                "{} wrote {} events to {}",
                self.name,
                summary.event_count,
                summary.path.display()
            );
        }

        Ok(true)
    }

    fn close(&self) {
        let running = *self.state.read() == SessionStatus::Running;
        if running {
            if let Err(e) = self.stop() {
                error!("Failed to stop {} while closing: {}", self.name, e);
            }
        }

        let mut state = self.state.write();
        if *state == SessionStatus::Closed {
            return;
        }
        *state = SessionStatus::Closed;
        drop(state);

        self.cancel.cancel();
        self.hub.unregister(self.mode, self.id);
        self.handlers.write().clear();
        debug!("{} closed", self.name);
    }

    fn status(&self) -> SessionStatus {
        *self.state.read()
    }
}

async fn sample_periodically(
    recording: Weak<Recording>,
    kind: String,
    period: Duration,
    hook: PeriodicHook,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(recording) = recording.upgrade() else {
            break;
        };
        let hook = Arc::clone(&hook);
        let kind = kind.clone();

        // delivery may block on a full queue
        let result = tokio::task::spawn_blocking(move || {
            if let Some(payload) = hook() {
                recording.deliver(&CapturedEvent::new(kind, payload).on_current_thread());
            }
        })
        .await;

        if let Err(e) = result {
            warn!("Periodic sampler stopped: {}", e);
            break;
        }
    }
}

async fn stop_after(recording: Weak<Recording>, duration: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(duration) => {}
    }

    let Some(recording) = recording.upgrade() else {
        return;
    };

    let result = tokio::task::spawn_blocking(move || {
        let stopped = recording.stop();
        recording.close();
        (recording.name.clone(), stopped)
    })
    .await;

    match result {
        Ok((name, Ok(_))) => debug!("{} reached its duration", name),
        Ok((name, Err(e))) => error!("{} failed to finalize: {}", name, e),
        Err(e) => error!("Auto-stop task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::catalog::{CPU_LOAD, GARBAGE_COLLECTION, USER_GUESS};
    use crate::recording::chunk_writer::{part_path, read_archive};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn hub() -> Arc<FlightRecorder> {
        Arc::new(FlightRecorder::with_builtin_catalog())
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let recording = hub().new_recording(1, SessionMode::Stream, "test");
        let result = recording.enable("runtime.Unknown", Sensitivity::Unconditional);
        assert!(matches!(result, Err(EngineError::Activation(_))));
        assert!(recording.settings().is_empty());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let recording = hub().new_recording(1, SessionMode::Stream, "test");
        assert!(matches!(recording.start(), Err(EngineError::Start(_))));
        assert_eq!(recording.status(), SessionStatus::Created);
    }

    #[tokio::test]
    async fn test_delivers_only_while_running() {
        let recording = hub().new_recording(1, SessionMode::Stream, "test");
        let counter = Arc::new(AtomicUsize::new(0));
        recording.enable(USER_GUESS, Sensitivity::Unconditional).unwrap();
        recording.on_event(counting_handler(&counter)).unwrap();

        let event = CapturedEvent::new(USER_GUESS, json!({ "guess": 1 }));
        assert!(!recording.deliver(&event));

        recording.start().unwrap();
        assert_eq!(recording.status(), SessionStatus::Running);
        assert!(recording.deliver(&event));
        assert!(recording.is_enabled(USER_GUESS));

        assert!(recording.stop().unwrap());
        assert_eq!(recording.status(), SessionStatus::Stopping);
        assert!(!recording.deliver(&event));
        assert!(!recording.is_enabled(USER_GUESS));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(recording.events_delivered(), 1);
    }

    #[tokio::test]
    async fn test_threshold_and_unknown_kinds_filtered() {
        let recording = hub().new_recording(1, SessionMode::Stream, "test");
        let counter = Arc::new(AtomicUsize::new(0));
        recording
            .enable(GARBAGE_COLLECTION, Sensitivity::Threshold(Duration::from_millis(10)))
            .unwrap();
        recording.on_event(counting_handler(&counter)).unwrap();
        recording.start().unwrap();

        let short = CapturedEvent::new(GARBAGE_COLLECTION, json!({})).with_duration(Duration::from_millis(2));
        let long = CapturedEvent::new(GARBAGE_COLLECTION, json!({})).with_duration(Duration::from_millis(25));
        let other = CapturedEvent::new(USER_GUESS, json!({}));

        assert!(!recording.deliver(&short));
        assert!(recording.deliver(&long));
        assert!(!recording.deliver(&other));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        recording.close();
    }

    #[tokio::test]
    async fn test_stop_and_close_are_idempotent() {
        let recording = hub().new_recording(1, SessionMode::Stream, "test");
        recording.start().unwrap();

        assert!(recording.stop().unwrap());
        assert!(!recording.stop().unwrap());

        recording.close();
        recording.close();
        assert_eq!(recording.status(), SessionStatus::Closed);
        assert!(!recording.stop().unwrap());
        assert!(matches!(recording.start(), Err(EngineError::Start(_))));
    }

    #[tokio::test]
    async fn test_configuration_locked_after_start() {
        let recording = hub().new_recording(1, SessionMode::Stream, "test");
        recording.start().unwrap();

        assert!(matches!(
            recording.enable(USER_GUESS, Sensitivity::Unconditional),
            Err(EngineError::Activation(_))
        ));
        assert!(recording.on_event(Box::new(|_| {})).is_err());
        recording.close();
    }

    #[tokio::test]
    async fn test_close_without_start() {
        let hub = hub();
        let recording = hub.new_recording(9, SessionMode::Archive, "never started");
        recording.close();
        assert_eq!(recording.status(), SessionStatus::Closed);
        assert!(hub.active_sessions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_periodic_hook_sampled() {
        let hub = hub();
        hub.add_periodic_hook(CPU_LOAD, || Some(json!({ "processLoad": 0.5 })))
            .unwrap();

        let recording = hub.new_recording(1, SessionMode::Stream, "sampled");
        let counter = Arc::new(AtomicUsize::new(0));
        recording
            .enable(CPU_LOAD, Sensitivity::Period(Duration::from_millis(20)))
            .unwrap();
        recording.on_event(counting_handler(&counter)).unwrap();
        recording.start().unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        recording.close();
        let sampled = counter.load(Ordering::SeqCst);
        assert!(sampled >= 3, "only {} samples", sampled);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), sampled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_archive_finalized_after_duration() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("recording-1.cap");

        let hub = hub();
        let recording = hub.new_recording(1, SessionMode::Archive, "archived");
        recording.enable(USER_GUESS, Sensitivity::Unconditional).unwrap();
        recording.set_destination(&destination);
        recording.set_duration(Duration::from_millis(300));
        recording.set_to_disk(true);
        recording.start().unwrap();

        assert!(part_path(&destination).exists());
        assert!(!destination.exists());

        hub.commit(CapturedEvent::new(USER_GUESS, json!({ "guess": 3 })));
        hub.commit(CapturedEvent::new(USER_GUESS, json!({ "guess": 8 })));

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(recording.status(), SessionStatus::Closed);
        assert!(destination.exists());
        assert!(!part_path(&destination).exists());

        let archive = read_archive(&destination).unwrap();
        assert_eq!(archive.header.name, "archived");
        assert_eq!(archive.header.settings[USER_GUESS], "unconditional");
        assert_eq!(archive.events.len(), 2);
        assert!(hub.active_sessions().is_empty());
    }
}
