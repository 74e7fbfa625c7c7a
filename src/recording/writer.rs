// src/recording/writer.rs
//! NDJSON record sinks
//!
//! A [`NdjsonWriter`] serializes each [`IrRecord`] as one compact JSON line,
//! either straight to the backing store or through a gzip stream. Every
//! operation on one writer runs under a single lock, so concurrent callers
//! never interleave partial lines and `count` always matches completed writes.

use crate::ir::IrRecord;
use crate::recording::compressor::{self, CompressionLevel};
use crate::utils::errors::{CaptureError, Result};
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Default flush interval for plain sinks (every record)
pub const PLAIN_FLUSH_INTERVAL: u64 = 1;

/// Default flush interval for gzip sinks
pub const GZIP_FLUSH_INTERVAL: u64 = 10;

/// Anything that persists IR records
pub trait RecordWriter: Send + Sync {
    /// Append one record; fails with [`CaptureError::WriterClosed`] after `close`
    fn write(&self, record: &IrRecord) -> Result<()>;

    /// Force buffered bytes to the backing store; no-op once closed
    fn flush(&self) -> Result<()>;

    /// Flush and release the backing store; idempotent
    fn close(&self) -> Result<()>;

    /// Number of successful writes
    fn count(&self) -> u64;
}

/// On-disk encoding of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    Plain,
    Gzip(CompressionLevel),
}

impl SinkFormat {
    /// `.gz` suffix selects gzip at the default level
    pub fn infer(path: &Path) -> Self {
        let gz = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        if gz {
            SinkFormat::Gzip(CompressionLevel::default())
        } else {
            SinkFormat::Plain
        }
    }

    pub fn default_flush_interval(&self) -> u64 {
        match self {
            SinkFormat::Plain => PLAIN_FLUSH_INTERVAL,
            SinkFormat::Gzip(_) => GZIP_FLUSH_INTERVAL,
        }
    }
}

type Sink = Box<dyn Write + Send>;

enum Backend {
    Plain(Sink),
    Gzip(GzEncoder<Sink>),
}

impl Backend {
    fn stream(&mut self) -> &mut dyn Write {
        match self {
            Backend::Plain(w) => w,
            Backend::Gzip(w) => w,
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Backend::Plain(mut w) => w.flush(),
            Backend::Gzip(w) => w.finish()?.flush(),
        }
    }
}

struct Inner {
    backend: Option<Backend>,
    count: u64,
}

/// Newline-delimited JSON writer, plain or gzip-compressed
pub struct NdjsonWriter {
    inner: Mutex<Inner>,
    format: SinkFormat,
    flush_interval: u64,
}

impl NdjsonWriter {
    /// Write to an arbitrary byte sink
    pub fn new<W: Write + Send + 'static>(sink: W, format: SinkFormat) -> Self {
        let sink: Sink = Box::new(sink);
        let backend = match format {
            SinkFormat::Plain => Backend::Plain(sink),
            SinkFormat::Gzip(level) => Backend::Gzip(compressor::encoder(sink, level)),
        };

        Self {
            inner: Mutex::new(Inner {
                backend: Some(backend),
                count: 0,
            }),
            format,
            flush_interval: format.default_flush_interval(),
        }
    }

    /// Plain NDJSON over `sink`
    pub fn plain<W: Write + Send + 'static>(sink: W) -> Self {
        Self::new(sink, SinkFormat::Plain)
    }

    /// gzip NDJSON over `sink`
    pub fn gzip<W: Write + Send + 'static>(sink: W, level: CompressionLevel) -> Self {
        Self::new(sink, SinkFormat::Gzip(level))
    }

    /// Create (truncate) a file at `path`; format inferred from the suffix
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::create_with(path, SinkFormat::infer(path))
    }

    /// Create (truncate) a file at `path` with an explicit format
    pub fn create_with(path: impl AsRef<Path>, format: SinkFormat) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;

        info!("Opened {:?} record sink at {}", format, path.display());

        Ok(Self::new(BufWriter::new(file), format))
    }

    /// Flush after this many writes (0 disables periodic flushing)
    pub fn with_flush_interval(mut self, interval: u64) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn format(&self) -> SinkFormat {
        self.format
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().backend.is_none()
    }
}

impl RecordWriter for NdjsonWriter {
    fn write(&self, record: &IrRecord) -> Result<()> {
        let mut guard = self.inner.lock();
        let Inner { backend, count } = &mut *guard;
        let backend = backend.as_mut().ok_or(CaptureError::WriterClosed)?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let stream = backend.stream();
        stream.write_all(&line)?;

        // The line is in the stream now, even if the flush below fails
        *count += 1;
        if self.flush_interval > 0 && *count % self.flush_interval == 0 {
            stream.flush()?;
        }

        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(backend) = inner.backend.as_mut() {
            backend.stream().flush()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.backend.take() {
            Some(backend) => {
                backend.finish()?;
                debug!("Closed record sink after {} records", inner.count);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn count(&self) -> u64 {
        self.inner.lock().count
    }
}

impl Drop for NdjsonWriter {
    fn drop(&mut self) {
        // Finish the gzip trailer if the owner never closed
        let _ = self.close();
    }
}
