// src/recording/chunk_writer.rs
//! Background writer that persists a recording as compressed chunks
//!
//! Events are pulled off a bounded queue, batched, serialized to JSON,
//! zstd-compressed and appended to `<destination>.part`. When every producer
//! has gone away the writer flushes the last batch, appends a footer, syncs
//! the file and renames it to the destination. Readers therefore never see a
//! half-written archive under its final name.
//!
//! # Layout
//!
//! ```text
//! CAPREC01 | [tag u8][len u32 LE][zstd bytes] ...
//!            tag 1 = header, 2 = event batch, 3 = footer
//! ```

use crate::instrumentation::event::CapturedEvent;
use crate::recording::compressor::{CompressionLevel, Compressor};
use crate::recording::event_queue::{self, BackpressurePolicy, Pop, QueueConsumer, QueueProducer};
use crate::utils::config::ArchiveConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub const ARCHIVE_MAGIC: &[u8; 8] = b"CAPREC01";

const TAG_HEADER: u8 = 1;
const TAG_EVENTS: u8 = 2;
const TAG_FOOTER: u8 = 3;

/// Metadata written as the first chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub id: u64,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: Option<u64>,
    /// Enabled event kinds and their sensitivity
    pub settings: BTreeMap<String, String>,
}

/// Trailer written once the recording has stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFooter {
    pub event_count: u64,
    pub ended_at: DateTime<Utc>,
}

/// Writer tuning
#[derive(Debug, Clone)]
pub struct ChunkWriterConfig {
    /// Events per chunk
    pub batch_size: usize,

    /// Longest time an event is held before its chunk is written
    pub flush_interval: Duration,

    /// Capacity of the queue feeding the writer thread
    pub queue_capacity: usize,

    pub compression: CompressionLevel,
}

impl Default for ChunkWriterConfig {
    fn default() -> Self {
        Self::from(&ArchiveConfig::default())
    }
}

impl From<&ArchiveConfig> for ChunkWriterConfig {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            queue_capacity: config.queue_capacity,
            compression: config.compression,
        }
    }
}

/// Outcome of a finished archive
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub event_count: u64,
    pub bytes_written: u64,
}

/// Handle to a running writer thread
pub struct ChunkWriter {
    destination: PathBuf,
    handle: Option<JoinHandle<Result<ArchiveSummary>>>,
}

impl ChunkWriter {
    /// Create `<destination>.part`, write the header and start the writer thread.
    ///
    /// Returns the writer and the producer events must be pushed into. The
    /// archive is finalized once every clone of the producer is dropped.
    pub fn create(
        destination: &Path,
        header: ArchiveHeader,
        config: ChunkWriterConfig,
    ) -> Result<(Self, QueueProducer<CapturedEvent>)> {
        let part = part_path(destination);
        let compressor = Compressor::new(config.compression);

        let file = File::create(&part).map_err(|e| {
            EngineError::Start(format!("Failed to create {}: {}", part.display(), e))
        })?;
        let mut out = BufWriter::new(file);

        if let Err(e) = write_header(&mut out, &compressor, &header) {
            discard(&part);
            return Err(EngineError::Start(format!(
                "Failed to write archive header to {}: {}",
                part.display(),
                e
            )));
        }

        let (producer, consumer) =
            event_queue::bounded(config.queue_capacity, BackpressurePolicy::Block);

        let task = WriterTask {
            out,
            consumer,
            compressor,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
            part: part.clone(),
            destination: destination.to_path_buf(),
        };

        let handle = std::thread::Builder::new()
            .name(format!("archive-writer-{}", header.id))
            .spawn(move || task.run())
            .map_err(|e| {
                discard(&part);
                EngineError::Start(format!("Failed to spawn archive writer: {}", e))
            })?;

        debug!("Archive writer started for {}", destination.display());

        Ok((
            Self {
                destination: destination.to_path_buf(),
                handle: Some(handle),
            },
            producer,
        ))
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Wait for the writer to drain its queue and finalize the archive.
    ///
    /// Blocks until every producer has been dropped.
    pub fn finish(mut self) -> Result<ArchiveSummary> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| EngineError::Storage("Archive writer already finished".to_string()))?;

        handle
            .join()
            .map_err(|_| EngineError::Storage("Archive writer thread panicked".to_string()))?
    }
}

struct WriterTask {
    out: BufWriter<File>,
    consumer: QueueConsumer<CapturedEvent>,
    compressor: Compressor,
    batch_size: usize,
    flush_interval: Duration,
    part: PathBuf,
    destination: PathBuf,
}

impl WriterTask {
    fn run(mut self) -> Result<ArchiveSummary> {
        match self.write_all() {
            Ok(event_count) => self.finalize(event_count),
            Err(e) => {
                error!("Archive writer for {} failed: {}", self.destination.display(), e);
                discard(&self.part);
                Err(e)
            }
        }
    }

    fn write_all(&mut self) -> Result<u64> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut event_count = 0u64;
        let mut deadline = Instant::now() + self.flush_interval;

        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.consumer.pop_timeout(timeout) {
                Pop::Item(event) => batch.push(event),
                Pop::Timeout => {}
                Pop::Disconnected => break,
            }

            if batch.len() >= self.batch_size || Instant::now() >= deadline {
                event_count += self.flush_batch(&mut batch)?;
                deadline = Instant::now() + self.flush_interval;
            }
        }

        event_count += self.flush_batch(&mut batch)?;

        let footer = ArchiveFooter {
            event_count,
            ended_at: Utc::now(),
        };
        let footer = serde_json::to_vec(&footer)
            .map_err(|e| EngineError::Storage(format!("Serialization error: {}", e)))?;
        write_chunk(&mut self.out, TAG_FOOTER, &self.compressor.compress(&footer)?)?;

        Ok(event_count)
    }

    fn flush_batch(&mut self, batch: &mut Vec<CapturedEvent>) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len() as u64;
        let json = serde_json::to_vec(&batch)
            .map_err(|e| EngineError::Storage(format!("Serialization error: {}", e)))?;
        let compressed = self.compressor.compress(&json)?;
        write_chunk(&mut self.out, TAG_EVENTS, &compressed)?;

        metrics::counter!("capture_archive_bytes_written_total")
            .increment(compressed.len() as u64 + 5);
        debug!("Wrote chunk of {} events to {}", count, self.part.display());

        batch.clear();
        Ok(count)
    }

    fn finalize(mut self, event_count: u64) -> Result<ArchiveSummary> {
        let result = (|| -> Result<u64> {
            self.out.flush()?;
            let file = self.out.get_ref();
            file.sync_all()?;
            let bytes_written = file.metadata()?.len();
            fs::rename(&self.part, &self.destination)?;
            Ok(bytes_written)
        })();

        match result {
            Ok(bytes_written) => {
                info!(
                    "Archive {} finalized: {} events, {} bytes",
                    self.destination.display(),
                    event_count,
                    bytes_written
                );
                Ok(ArchiveSummary {
                    path: self.destination,
                    event_count,
                    bytes_written,
                })
            }
            Err(e) => {
                error!("Failed to finalize {}: {}", self.destination.display(), e);
                discard(&self.part);
                Err(EngineError::Storage(format!(
                    "Failed to finalize {}: {}",
                    self.destination.display(),
                    e
                )))
            }
        }
    }
}

/// `<destination>.part`
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

fn write_header<W: Write>(out: &mut W, compressor: &Compressor, header: &ArchiveHeader) -> Result<()> {
    out.write_all(ARCHIVE_MAGIC)?;
    let json = serde_json::to_vec(header)
        .map_err(|e| EngineError::Storage(format!("Serialization error: {}", e)))?;
    write_chunk(out, TAG_HEADER, &compressor.compress(&json)?)?;
    out.flush()?;
    Ok(())
}

fn write_chunk<W: Write>(out: &mut W, tag: u8, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| EngineError::Storage(format!("Chunk of {} bytes is too large", data.len())))?;
    out.write_all(&[tag])?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(data)?;
    Ok(())
}

/// Decoded archive contents
#[derive(Debug, Clone)]
pub struct Archive {
    pub header: ArchiveHeader,
    pub events: Vec<CapturedEvent>,
    pub footer: Option<ArchiveFooter>,
}

/// Decode an archive file
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<Archive> {
    let data = fs::read(path.as_ref())?;
    let compressor = Compressor::default();

    let body = data
        .strip_prefix(ARCHIVE_MAGIC.as_slice())
        .ok_or_else(|| EngineError::Storage("Not a capture archive".to_string()))?;

    let mut header = None;
    let mut events = Vec::new();
    let mut footer = None;
    let mut cursor = body;

    while !cursor.is_empty() {
        if cursor.len() < 5 {
            return Err(EngineError::Storage("Truncated chunk header".to_string()));
        }
        let tag = cursor[0];
        let len = u32::from_le_bytes([cursor[1], cursor[2], cursor[3], cursor[4]]) as usize;
        let end = 5 + len;
        if cursor.len() < end {
            return Err(EngineError::Storage("Truncated chunk body".to_string()));
        }
        let chunk = compressor.decompress(&cursor[5..end])?;
        cursor = &cursor[end..];

        let parse_err = |e: serde_json::Error| EngineError::Storage(format!("Corrupt chunk: {}", e));
        match tag {
            TAG_HEADER => header = Some(serde_json::from_slice(&chunk).map_err(parse_err)?),
            TAG_EVENTS => {
                let batch: Vec<CapturedEvent> = serde_json::from_slice(&chunk).map_err(parse_err)?;
                events.extend(batch);
            }
            TAG_FOOTER => footer = Some(serde_json::from_slice(&chunk).map_err(parse_err)?),
            other => {
                return Err(EngineError::Storage(format!("Unknown chunk tag {}", other)));
            }
        }
    }

    let header = header.ok_or_else(|| EngineError::Storage("Missing archive header".to_string()))?;

    Ok(Archive {
        header,
        events,
        footer,
    })
}
