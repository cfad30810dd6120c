// src/capture/archive.rs
//! Fixed-duration recordings persisted to archive files
//!
//! Each call to [`ArchiveRecorder::start`] allocates a fresh id, points a new
//! archive session at `{output_dir}/{file_prefix}-{id}.{extension}` and
//! returns as soon as capture has begun. The session stops itself once the
//! duration elapses. The file is only renamed into place at that point, so
//! its presence means the capture is complete.

use crate::capture::configurator::{validate_duration, SessionConfigurator};
use crate::instrumentation::flight_recorder::FlightRecorder;
use crate::instrumentation::session::{CaptureSession, Recording, SessionMode};
use crate::recording::chunk_writer::{part_path, ChunkWriterConfig};
use crate::utils::config::ArchiveConfig;
use crate::utils::errors::{EngineError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A started archive recording
#[derive(Clone)]
pub struct ArchiveTicket {
    pub id: u64,
    pub path: PathBuf,
    pub duration: Duration,
    pub recording: Arc<Recording>,
}

pub struct ArchiveRecorder {
    recorder: Arc<FlightRecorder>,
    configurator: SessionConfigurator,
    config: ArchiveConfig,
    next_id: AtomicU64,
}

impl ArchiveRecorder {
    pub fn new(
        recorder: Arc<FlightRecorder>,
        configurator: SessionConfigurator,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            recorder,
            configurator,
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// File an archive with the given id is written to
    pub fn destination(&self, id: u64) -> PathBuf {
        self.config.output_dir.join(format!(
            "{}-{}.{}",
            self.config.file_prefix, id, self.config.extension
        ))
    }

    /// Most recently allocated id, `0` if none
    pub fn last_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Start a recording that captures for `duration_secs` seconds.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, duration_secs: i64) -> Result<ArchiveTicket> {
        let duration = validate_duration(duration_secs).map_err(|e| {
            self.failed(&e);
            e
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.destination(id);

        match self.launch(id, &path, duration_secs) {
            Ok(recording) => {
                metrics::counter!("capture_sessions_started_total", "mode" => SessionMode::Archive.as_str())
                    .increment(1);
                info!(
                    "Recording #{} started for {:?}, writing to {}",
                    id,
                    duration,
                    path.display()
                );
                Ok(ArchiveTicket {
                    id,
                    path,
                    duration,
                    recording,
                })
            }
            Err(e) => {
                warn!("Recording #{} failed to start: {}", id, e);
                self.failed(&e);
                Err(e)
            }
        }
    }

    fn launch(&self, id: u64, path: &Path, duration_secs: i64) -> Result<Arc<Recording>> {
        remove_stale(path)?;
        remove_stale(&part_path(path))?;

        let recording = self.recorder.new_recording(
            id,
            SessionMode::Archive,
            format!("Archive recording #{}", id),
        );
        let duration = self.configurator.apply(&*recording, duration_secs)?;

        recording.set_destination(path);
        recording.set_duration(duration);
        recording.set_to_disk(true);
        recording.set_writer_config(ChunkWriterConfig::from(&self.config));

        if let Err(e) = recording.start() {
            recording.close();
            return Err(e);
        }
        Ok(recording)
    }

    fn failed(&self, error: &EngineError) {
        metrics::counter!(
            "capture_sessions_failed_total",
            "mode" => SessionMode::Archive.as_str(),
            "reason" => error.kind()
        )
        .increment(1);
    }
}

/// Remove a leftover file so a new archive never appends to it
fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::Start(format!(
            "Cannot replace {}: {}",
            path.display(),
            e
        ))),
    }
}
