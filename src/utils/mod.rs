// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::{AppConfig, CaptureConfig, CaptureOptions, CaptureOptionsBuilder};
pub use errors::{CaptureError, ErrorCallback, Result};
