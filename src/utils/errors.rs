// src/utils/errors.rs
//! Error types shared across the capture pipeline

use std::sync::Arc;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Callback receiving isolated per-record failures
pub type ErrorCallback = Arc<dyn Fn(&CaptureError) + Send + Sync>;

/// Errors raised by capture, normalization and persistence
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Write attempted after the writer was closed
    #[error("writer has been closed")]
    WriterClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid request url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported request method: {0}")]
    UnsupportedMethod(String),

    #[error("failed to retrieve body: {0}")]
    BodyRetrieval(String),

    #[error("line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported IR version: {found} (expected {expected})")]
    UnsupportedVersion { found: String, expected: String },

    #[error("unrecognized IR input format")]
    UnrecognizedFormat,

    #[error("interception failed: {0}")]
    InterceptionFailed(String),

    #[error("{} writers failed: {}", .0.len(), join_errors(.0))]
    Fanout(Vec<CaptureError>),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[CaptureError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CaptureError {
    /// True for errors caused by using a closed writer
    pub fn is_closed(&self) -> bool {
        match self {
            CaptureError::WriterClosed => true,
            CaptureError::Fanout(errors) => errors.iter().all(CaptureError::is_closed),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_detection() {
        assert!(CaptureError::WriterClosed.is_closed());
        assert!(!CaptureError::Config("x".into()).is_closed());

        let fanout = CaptureError::Fanout(vec![CaptureError::WriterClosed, CaptureError::WriterClosed]);
        assert!(fanout.is_closed());
    }

    #[test]
    fn test_fanout_message() {
        let err = CaptureError::Fanout(vec![
            CaptureError::WriterClosed,
            CaptureError::Config("bad".into()),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 writers failed"));
        assert!(msg.contains("writer has been closed"));
        assert!(msg.contains("invalid configuration: bad"));
    }
}
