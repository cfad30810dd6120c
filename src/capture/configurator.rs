// src/capture/configurator.rs
//! Applies the capture table to a session

use crate::instrumentation::catalog::CaptureTable;
use crate::instrumentation::session::CaptureSession;
use crate::utils::errors::{EngineError, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Validate a requested capture duration
pub fn validate_duration(duration_secs: i64) -> Result<Duration> {
    if duration_secs <= 0 {
        return Err(EngineError::Configuration(format!(
            "Duration must be a positive number of seconds, got {}",
            duration_secs
        )));
    }
    Ok(Duration::from_secs(duration_secs as u64))
}

/// Activates every capture-table entry on a session
#[derive(Debug, Clone, Default)]
pub struct SessionConfigurator {
    table: CaptureTable,
}

impl SessionConfigurator {
    pub fn new(table: CaptureTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &CaptureTable {
        &self.table
    }

    /// Validate the duration and enable every table entry on `session`.
    ///
    /// Does not start the session. If any kind is rejected the session is
    /// closed before the error is returned.
    pub fn apply(&self, session: &dyn CaptureSession, duration_secs: i64) -> Result<Duration> {
        let duration = validate_duration(duration_secs)?;

        for entry in self.table.entries() {
            if let Err(e) = session.enable(&entry.kind, entry.sensitivity) {
                warn!(
                    "Recording #{} rejected {} ({}): {}",
                    session.id(),
                    entry.kind,
                    entry.sensitivity,
                    e
                );
                session.close();
                return Err(match e {
                    EngineError::Activation(_) => e,
                    other => EngineError::Activation(other.to_string()),
                });
            }
        }

        debug!(
            "Recording #{} configured with {} event kinds for {:?}",
            session.id(),
            self.table.len(),
            duration
        );
        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::catalog::{CPU_LOAD, USER_GUESS};
    use crate::instrumentation::event::{EventKindSpec, Sensitivity};
    use crate::instrumentation::flight_recorder::FlightRecorder;
    use crate::instrumentation::session::{EventHandler, SessionMode, SessionStatus};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;

    /// Session that accepts a fixed number of kinds, then rejects
    struct FlakySession {
        accept: usize,
        enabled: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    impl CaptureSession for FlakySession {
        fn id(&self) -> u64 {
            42
        }

        fn enable(&self, kind: &str, _sensitivity: Sensitivity) -> Result<()> {
            let mut enabled = self.enabled.lock();
            if enabled.len() >= self.accept {
                return Err(EngineError::Storage(format!("cannot enable {}", kind)));
            }
            enabled.push(kind.to_string());
            Ok(())
        }

        fn on_event(&self, _handler: EventHandler) -> Result<()> {
            Ok(())
        }

        fn start(&self) -> Result<()> {
            Ok(())
        }

        fn stop(&self) -> Result<bool> {
            Ok(false)
        }

        fn close(&self) {
            *self.closed.lock() = true;
        }

        fn status(&self) -> SessionStatus {
            if *self.closed.lock() {
                SessionStatus::Closed
            } else {
                SessionStatus::Created
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        assert!(matches!(validate_duration(0), Err(EngineError::Configuration(_))));
        assert!(matches!(validate_duration(-3), Err(EngineError::Configuration(_))));
        assert_eq!(validate_duration(2).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_applies_every_entry_without_starting() {
        let hub = Arc::new(FlightRecorder::with_builtin_catalog());
        let recording = hub.new_recording(1, SessionMode::Archive, "configured");
        let configurator = SessionConfigurator::default();

        let duration = configurator.apply(&*recording, 5).unwrap();
        assert_eq!(duration, Duration::from_secs(5));

        let settings = recording.settings();
        assert_eq!(settings.len(), configurator.table().len());
        assert_eq!(settings[CPU_LOAD], Sensitivity::Period(Duration::from_millis(500)));
        assert_eq!(settings[USER_GUESS], Sensitivity::Unconditional);
        assert_eq!(recording.status(), SessionStatus::Created);
    }

    #[test]
    fn test_bad_duration_touches_nothing() {
        let hub = Arc::new(FlightRecorder::with_builtin_catalog());
        let recording = hub.new_recording(1, SessionMode::Stream, "untouched");

        let result = SessionConfigurator::default().apply(&*recording, 0);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
        assert!(recording.settings().is_empty());
        assert_eq!(recording.status(), SessionStatus::Created);
    }

    #[test]
    fn test_unknown_kind_closes_session() {
        let table = CaptureTable::new(vec![
            EventKindSpec::unconditional(USER_GUESS),
            EventKindSpec::unconditional("runtime.DoesNotExist"),
        ])
        .unwrap();
        let hub = Arc::new(FlightRecorder::with_builtin_catalog());
        let recording = hub.new_recording(1, SessionMode::Stream, "doomed");

        let result = SessionConfigurator::new(table).apply(&*recording, 1);
        assert!(matches!(result, Err(EngineError::Activation(_))));
        assert_eq!(recording.status(), SessionStatus::Closed);
    }

    #[test]
    fn test_foreign_rejection_becomes_activation_error() {
        let session = FlakySession {
            accept: 2,
            enabled: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        };

        let result = SessionConfigurator::default().apply(&session, 10);
        assert!(matches!(result, Err(EngineError::Activation(_))));
        assert_eq!(session.enabled.lock().len(), 2);
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    proptest! {
        #[test]
        fn prop_non_positive_durations_rejected(secs in i64::MIN..=0) {
            prop_assert!(matches!(validate_duration(secs), Err(EngineError::Configuration(_))));
        }

        #[test]
        fn prop_positive_durations_accepted(secs in 1i64..=7 * 24 * 3600) {
            prop_assert_eq!(validate_duration(secs).unwrap(), Duration::from_secs(secs as u64));
        }
    }
}
