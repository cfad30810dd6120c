// src/recording/mod.rs
//! Event buffering and archive persistence
//!
//! - **Event Queue**: bounded producer/consumer queue with a backpressure policy
//! - **Compressor**: zstd compression of archive chunks
//! - **Chunk Writer**: background writer producing archive files
//!
//! # Architecture
//!
//! ```text
//! Recording handler → Bounded Queue → Writer Thread
//!                                          ↓
//!                                 Batch (size or interval)
//!                                          ↓
//!                                 Serialize + Compress (zstd)
//!                                          ↓
//!                                 <destination>.part ──rename──▶ <destination>
//! ```

pub mod chunk_writer;
pub mod compressor;
pub mod event_queue;

// Re-export commonly used types
pub use chunk_writer::{read_archive, Archive, ArchiveHeader, ArchiveSummary, ChunkWriter, ChunkWriterConfig};
pub use compressor::{CompressionLevel, Compressor};
pub use event_queue::{BackpressurePolicy, Pop, PushError, QueueConsumer, QueueProducer, QueueStats};
