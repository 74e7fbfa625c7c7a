// src/utils/config.rs
//! Capture configuration
//!
//! [`CaptureConfig`] is the raw, serde-friendly shape read from files and the
//! environment. [`CaptureOptions`] is the validated, immutable form the
//! pipeline runs on: patterns compiled, header names lower-cased, the sink
//! format resolved. Invalid combinations are rejected when it is built.

use crate::ir::RecordSource;
use crate::ir::RequestMethod;
use crate::recording::{CompressionLevel, SinkFormat};
use crate::utils::errors::{CaptureError, ErrorCallback, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Security-sensitive headers removed from every record
pub const DEFAULT_EXCLUDE_HEADERS: [&str; 7] = [
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-csrf-token",
    "proxy-authorization",
];

/// Content-type prefixes whose bodies are captured
pub const DEFAULT_CAPTURE_CONTENT_TYPES: [&str; 5] = [
    "application/json",
    "application/xml",
    "text/xml",
    "text/plain",
    "text/html",
];

/// 1 MiB
pub const DEFAULT_MAX_BODY_SIZE: i64 = 1024 * 1024;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "TRAFFIC_CONFIG";

/// Raw capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Output file; `.gz` selects the gzip sink
    pub output: PathBuf,

    /// Exact hostnames to capture (empty = all)
    pub filter_hosts: Vec<String>,

    /// Methods to capture, case-insensitive (empty = all)
    pub filter_methods: Vec<String>,

    /// Exact paths never captured
    pub exclude_paths: Vec<String>,

    /// Regular expressions matched from the start of the path
    pub exclude_path_patterns: Vec<String>,

    pub exclude_headers: Vec<String>,
    pub include_headers: bool,

    pub capture_request_body: bool,
    pub capture_response_body: bool,

    /// Larger bodies are dropped, never truncated
    pub max_body_size: i64,

    pub capture_content_types: Vec<String>,

    pub gzip: bool,
    pub compression_level: u32,

    /// Flush every N writes (0 disables); defaults per sink format
    pub flush_interval: Option<u64>,

    pub skip_status_codes: Vec<u16>,

    /// Fraction of responses captured; values outside (0, 1) capture all
    pub sample_rate: f64,

    /// Headers whose first non-empty value becomes the record id
    pub request_id_headers: Vec<String>,

    pub source: RecordSource,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("traffic.ndjson"),
            filter_hosts: vec![],
            filter_methods: vec![],
            exclude_paths: vec![],
            exclude_path_patterns: vec![],
            exclude_headers: DEFAULT_EXCLUDE_HEADERS.iter().map(|h| h.to_string()).collect(),
            include_headers: true,
            capture_request_body: true,
            capture_response_body: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            capture_content_types: DEFAULT_CAPTURE_CONTENT_TYPES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            gzip: false,
            compression_level: CompressionLevel::default().as_u32(),
            flush_interval: None,
            skip_status_codes: vec![],
            sample_rate: 1.0,
            request_id_headers: vec![],
            source: RecordSource::default(),
        }
    }
}

/// Validated, immutable capture options
#[derive(Clone)]
pub struct CaptureOptions {
    pub(crate) output: PathBuf,
    pub(crate) filter_hosts: Vec<String>,
    pub(crate) filter_methods: Vec<RequestMethod>,
    pub(crate) exclude_paths: HashSet<String>,
    pub(crate) exclude_path_patterns: Vec<Regex>,
    pub(crate) exclude_headers: HashSet<String>,
    pub(crate) include_headers: bool,
    pub(crate) capture_request_body: bool,
    pub(crate) capture_response_body: bool,
    pub(crate) max_body_size: usize,
    pub(crate) capture_content_types: Vec<String>,
    pub(crate) sink_format: SinkFormat,
    pub(crate) flush_interval: u64,
    pub(crate) skip_status_codes: HashSet<u16>,
    pub(crate) sample_rate: f64,
    pub(crate) request_id_headers: Vec<String>,
    pub(crate) source: RecordSource,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl CaptureOptions {
    /// Start building options for `output`
    pub fn builder(output: impl Into<PathBuf>) -> CaptureOptionsBuilder {
        CaptureOptionsBuilder::new(output)
    }

    /// Validate a raw configuration
    pub fn from_config(config: CaptureConfig) -> Result<Self> {
        Self::from_parts(config, None)
    }

    fn from_parts(config: CaptureConfig, on_error: Option<ErrorCallback>) -> Result<Self> {
        if config.output.as_os_str().is_empty() {
            return Err(CaptureError::Config("output path is empty".to_string()));
        }

        if config.max_body_size < 0 {
            return Err(CaptureError::Config(format!(
                "max_body_size must not be negative, got {}",
                config.max_body_size
            )));
        }

        if !config.sample_rate.is_finite() || !(0.0..=1.0).contains(&config.sample_rate) {
            return Err(CaptureError::Config(format!(
                "sample_rate must be within [0, 1], got {}",
                config.sample_rate
            )));
        }

        let level = CompressionLevel::new(config.compression_level)?;

        let filter_methods = config
            .filter_methods
            .iter()
            .map(|m| m.parse::<RequestMethod>())
            .collect::<Result<Vec<_>>>()?;

        let exclude_path_patterns = config
            .exclude_path_patterns
            .iter()
            .map(|p| compile_prefix_pattern(p))
            .collect::<Result<Vec<_>>>()?;

        let sink_format = if config.gzip || SinkFormat::infer(&config.output) != SinkFormat::Plain {
            SinkFormat::Gzip(level)
        } else {
            SinkFormat::Plain
        };
        let flush_interval = config
            .flush_interval
            .unwrap_or_else(|| sink_format.default_flush_interval());

        debug!(
            "Capture options validated: {:?} sink, {} host filters, {} path patterns",
            sink_format,
            config.filter_hosts.len(),
            exclude_path_patterns.len()
        );

        Ok(Self {
            output: config.output,
            filter_hosts: config.filter_hosts,
            filter_methods,
            exclude_paths: config.exclude_paths.into_iter().collect(),
            exclude_path_patterns,
            exclude_headers: config
                .exclude_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            include_headers: config.include_headers,
            capture_request_body: config.capture_request_body,
            capture_response_body: config.capture_response_body,
            max_body_size: config.max_body_size as usize,
            capture_content_types: config.capture_content_types,
            sink_format,
            flush_interval,
            skip_status_codes: config.skip_status_codes.into_iter().collect(),
            sample_rate: config.sample_rate,
            request_id_headers: config
                .request_id_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            source: config.source,
            on_error,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn sink_format(&self) -> SinkFormat {
        self.sink_format
    }

    pub fn flush_interval(&self) -> u64 {
        self.flush_interval
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn source(&self) -> RecordSource {
        self.source
    }

    pub fn on_error(&self) -> Option<&ErrorCallback> {
        self.on_error.as_ref()
    }
}

impl fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("output", &self.output)
            .field("filter_hosts", &self.filter_hosts)
            .field("filter_methods", &self.filter_methods)
            .field("exclude_paths", &self.exclude_paths)
            .field("exclude_path_patterns", &self.exclude_path_patterns)
            .field("exclude_headers", &self.exclude_headers)
            .field("include_headers", &self.include_headers)
            .field("max_body_size", &self.max_body_size)
            .field("sink_format", &self.sink_format)
            .field("flush_interval", &self.flush_interval)
            .field("sample_rate", &self.sample_rate)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Anchor a user pattern at the start of the path
fn compile_prefix_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})", pattern)).map_err(|source| CaptureError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Builder for [`CaptureOptions`]
pub struct CaptureOptionsBuilder {
    config: CaptureConfig,
    on_error: Option<ErrorCallback>,
}

impl CaptureOptionsBuilder {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            config: CaptureConfig {
                output: output.into(),
                ..Default::default()
            },
            on_error: None,
        }
    }

    pub fn filter_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.filter_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.filter_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.exclude_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.exclude_path_patterns.push(pattern.into());
        self
    }

    /// Replace the excluded-header set
    pub fn exclude_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.exclude_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn include_headers(mut self, include: bool) -> Self {
        self.config.include_headers = include;
        self
    }

    pub fn capture_request_body(mut self, capture: bool) -> Self {
        self.config.capture_request_body = capture;
        self
    }

    pub fn capture_response_body(mut self, capture: bool) -> Self {
        self.config.capture_response_body = capture;
        self
    }

    pub fn max_body_size(mut self, bytes: i64) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    pub fn capture_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.capture_content_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.config.gzip = gzip;
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.config.compression_level = level;
        self
    }

    pub fn flush_interval(mut self, interval: u64) -> Self {
        self.config.flush_interval = Some(interval);
        self
    }

    pub fn skip_status_codes<I: IntoIterator<Item = u16>>(mut self, codes: I) -> Self {
        self.config.skip_status_codes = codes.into_iter().collect();
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.config.sample_rate = rate;
        self
    }

    pub fn request_id_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.request_id_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(mut self, source: RecordSource) -> Self {
        self.config.source = source;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CaptureError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<CaptureOptions> {
        CaptureOptions::from_parts(self.config, self.on_error)
    }
}

/// Proxy listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub upstream_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8899,
            upstream_timeout_secs: 30,
        }
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset
    pub log_filter: String,
    pub json_logs: bool,
    /// Prometheus listener, e.g. `127.0.0.1:9464`
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json_logs: false,
            metrics_addr: None,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub proxy: ProxyConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load from `$TRAFFIC_CONFIG` (or `./capture.toml` if present) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load from an explicit file, layered under `TRAFFIC_*` environment variables
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => ::config::File::from(p).required(true),
            None => ::config::File::with_name("capture").required(false),
        };

        let env = ::config::Environment::with_prefix("TRAFFIC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("capture.filter_hosts")
            .with_list_parse_key("capture.filter_methods")
            .with_list_parse_key("capture.exclude_paths")
            .with_list_parse_key("capture.exclude_path_patterns")
            .with_list_parse_key("capture.exclude_headers")
            .with_list_parse_key("capture.capture_content_types")
            .with_list_parse_key("capture.skip_status_codes")
            .with_list_parse_key("capture.request_id_headers");

        ::config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CaptureError::Config(e.to_string()))
    }

    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }
}
