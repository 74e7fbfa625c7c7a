// src/lib.rs
//! HTTP Traffic Capture Library
//!
//! This library observes HTTP request/response exchanges, decides which ones
//! are in scope, normalizes them into IR records and streams them to a plain
//! or gzip-compressed NDJSON sink.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **interception**: event sources, correlation, filtering, normalization,
//!   the capture controller and the recording proxy
//! - **ir**: the record schema and read-back of captured files
//! - **recording**: NDJSON writers (plain, gzip, async, fan-out)
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and errors
//!
//! # Example
//!
//! ```no_run
//! use traffic_capture::{CaptureController, CaptureOptions};
//!
//! # fn main() -> traffic_capture::Result<()> {
//! let options = CaptureOptions::builder("session.ndjson.gz")
//!     .filter_hosts(["api.example.com"])
//!     .exclude_paths(["/health"])
//!     .build()?;
//! let controller = CaptureController::new(options)?;
//! // controller.attach(&source) for a blocking source,
//! // controller.attach_async(&source) for a cooperative one.
//! controller.close()?;
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod interception;
pub mod ir;
pub mod observability;
pub mod recording;
pub mod utils;

// Re-export commonly used types
pub use interception::{CaptureController, CaptureOutcome, CaptureProxy, Normalizer};
pub use ir::{IrRecord, Request, RequestMethod, Response};
pub use recording::{NdjsonWriter, RecordWriter, SinkFormat};
pub use utils::config::{AppConfig, CaptureOptions};
pub use utils::errors::{CaptureError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
        assert!(!info.rustc_version.is_empty());
    }
}
