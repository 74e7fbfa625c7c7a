// src/recording/mod.rs
//! Record persistence
//!
//! This module provides the sinks captured records are written to:
//!
//! - **Writer**: plain or gzip NDJSON sink behind a single lock
//! - **Compressor**: gzip levels and stream helpers
//! - **Async Writer**: bounded queue drained by a background thread
//! - **Multi Writer**: fan-out to several sinks
//!
//! # Architecture
//!
//! ```text
//! Controller → write(record) → [AsyncRecordWriter queue] → NdjsonWriter
//!                                                            ↓
//!                                               serialize + '\n'
//!                                                            ↓
//!                                            plain file | gzip stream
//! ```

pub mod async_writer;
pub mod compressor;
pub mod multi_writer;
pub mod writer;

// Re-export commonly used types
pub use async_writer::{AsyncRecordWriter, AsyncWriterConfig};
pub use compressor::CompressionLevel;
pub use multi_writer::MultiWriter;
pub use writer::{NdjsonWriter, RecordWriter, SinkFormat};
