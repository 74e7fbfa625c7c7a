// src/recording/async_writer.rs
//! Background record writer
//!
//! Records are queued on a bounded channel and drained by a dedicated thread
//! into the wrapped [`RecordWriter`], so callers on the event path only pay
//! for a clone and a channel send. Failures on the background thread are
//! delivered to the configured error callback.

use crate::ir::IrRecord;
use crate::recording::writer::RecordWriter;
use crate::utils::errors::{CaptureError, ErrorCallback, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Async writer configuration
#[derive(Clone)]
pub struct AsyncWriterConfig {
    /// Queue capacity; writers block once it is full
    pub buffer_size: usize,

    /// Receives write failures from the background thread
    pub on_error: Option<ErrorCallback>,
}

impl Default for AsyncWriterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            on_error: None,
        }
    }
}

enum Command {
    Write(Box<IrRecord>),
    Flush(Sender<Result<()>>),
}

/// Queue-backed writer draining into another [`RecordWriter`]
pub struct AsyncRecordWriter {
    inner: Arc<dyn RecordWriter>,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncRecordWriter {
    /// Start the background thread
    pub fn new(inner: Arc<dyn RecordWriter>, config: AsyncWriterConfig) -> Result<Self> {
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        let worker_inner = Arc::clone(&inner);
        let on_error = config.on_error.clone();
        let worker = std::thread::Builder::new()
            .name("ir-async-writer".to_string())
            .spawn(move || Self::drain(receiver, worker_inner, on_error))?;

        info!("Started async record writer (buffer {})", config.buffer_size);

        Ok(Self {
            inner,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn drain(
        receiver: Receiver<Command>,
        inner: Arc<dyn RecordWriter>,
        on_error: Option<ErrorCallback>,
    ) {
        for command in receiver {
            match command {
                Command::Write(record) => {
                    if let Err(e) = inner.write(&record) {
                        error!("Async write failed: {}", e);
                        if let Some(cb) = &on_error {
                            cb(&e);
                        }
                    }
                }
                Command::Flush(reply) => {
                    let _ = reply.send(inner.flush());
                }
            }
        }
        debug!("Async writer queue drained");
    }

    /// Records queued but not yet handed to the inner writer
    pub fn pending(&self) -> usize {
        self.sender.lock().as_ref().map(|s| s.len()).unwrap_or(0)
    }
}

impl RecordWriter for AsyncRecordWriter {
    fn write(&self, record: &IrRecord) -> Result<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(CaptureError::WriterClosed)?;

        sender
            .send(Command::Write(Box::new(record.clone())))
            .map_err(|_| CaptureError::WriterClosed)
    }

    /// Waits until every record queued before this call has been written
    fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        {
            let sender = self.sender.lock();
            let Some(sender) = sender.as_ref() else {
                return Ok(());
            };
            if sender.send(Command::Flush(reply_tx)).is_err() {
                return Ok(());
            }
        }

        reply_rx.recv().unwrap_or(Ok(()))
    }

    fn close(&self) -> Result<()> {
        let Some(sender) = self.sender.lock().take() else {
            return Ok(());
        };
        drop(sender);

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Async writer thread panicked");
            }
        }

        self.inner.close()
    }

    fn count(&self) -> u64 {
        self.inner.count()
    }
}

impl Drop for AsyncRecordWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
