// src/recording/multi_writer.rs
//! Fan a record stream out to several sinks

use crate::ir::IrRecord;
use crate::recording::writer::RecordWriter;
use crate::utils::errors::{CaptureError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Writes every record to each wrapped writer in order.
///
/// A failing writer does not stop the others; failures are collected and
/// returned together. `count` tracks calls that succeeded on every writer.
pub struct MultiWriter {
    writers: Vec<Arc<dyn RecordWriter>>,
    count: AtomicU64,
}

impl MultiWriter {
    pub fn new(writers: Vec<Arc<dyn RecordWriter>>) -> Result<Self> {
        if writers.is_empty() {
            return Err(CaptureError::Config(
                "at least one writer is required".to_string(),
            ));
        }

        Ok(Self {
            writers,
            count: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    fn each<F>(&self, op: F) -> Result<()>
    where
        F: Fn(&dyn RecordWriter) -> Result<()>,
    {
        let mut errors: Vec<CaptureError> = self
            .writers
            .iter()
            .filter_map(|w| op(w.as_ref()).err())
            .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CaptureError::Fanout(errors)),
        }
    }
}

impl RecordWriter for MultiWriter {
    fn write(&self, record: &IrRecord) -> Result<()> {
        let result = self.each(|w| w.write(record));
        match &result {
            Ok(()) => {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!("Fan-out write failed: {}", e),
        }
        result
    }

    fn flush(&self) -> Result<()> {
        self.each(|w| w.flush())
    }

    fn close(&self) -> Result<()> {
        self.each(|w| w.close())
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}
