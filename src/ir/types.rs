// src/ir/types.rs
//! IR record model
//!
//! Canonical request/response schema written one-per-line to NDJSON sinks.
//! Optional fields are omitted from the encoding entirely; an absent field
//! means "filtered out by policy", never "empty".

use crate::utils::errors::{CaptureError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// IR schema version written into batch files
pub const IR_VERSION: &str = "ir.v1";

/// HTTP request methods accepted by the IR schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
    Connect,
}

impl RequestMethod {
    pub const ALL: [RequestMethod; 9] = [
        RequestMethod::Get,
        RequestMethod::Post,
        RequestMethod::Put,
        RequestMethod::Patch,
        RequestMethod::Delete,
        RequestMethod::Head,
        RequestMethod::Options,
        RequestMethod::Trace,
        RequestMethod::Connect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Head => "HEAD",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Trace => "TRACE",
            RequestMethod::Connect => "CONNECT",
        }
    }
}

impl FromStr for RequestMethod {
    type Err = CaptureError;

    /// Case-insensitive; observed traffic may carry lower-case methods.
    fn from_str(s: &str) -> Result<Self> {
        RequestMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CaptureError::UnsupportedMethod(s.to_string()))
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter that produced a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Instrumented browser session
    #[default]
    Playwright,
    /// Recording forward proxy
    Proxy,
    /// HTTP Archive import
    Har,
    /// Hand-built records
    Manual,
}

/// Query parameter value; scalar when the key appeared once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    /// Append an observed value, promoting a scalar to a sequence
    pub fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                let first = std::mem::take(first);
                *self = QueryValue::Multi(vec![first, value]);
            }
            QueryValue::Multi(values) => values.push(value),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(v) => vec![v.as_str()],
            QueryValue::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

pub type QueryMap = BTreeMap<String, QueryValue>;
pub type HeaderMap = BTreeMap<String, String>;

/// HTTP request details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method: RequestMethod,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_params: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: RequestMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            path: if path.is_empty() { "/".to_string() } else { path },
            scheme: None,
            host: None,
            path_template: None,
            path_params: None,
            query: None,
            headers: None,
            content_type: None,
            body: None,
        }
    }
}

/// HTTP response details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: None,
            content_type: None,
            body: None,
        }
    }
}

/// A single captured request/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrRecord {
    pub request: Request,
    pub response: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp_z")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<RecordSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl IrRecord {
    /// Create a record with a fresh UUID, the current time and the default source
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            id: Some(Uuid::new_v4().to_string()),
            timestamp: Some(Utc::now()),
            source: Some(RecordSource::default()),
            duration_ms: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_source(mut self, source: RecordSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.request.host = Some(host.into());
        self
    }

    pub fn with_request_body(mut self, body: Value) -> Self {
        self.request.body = Some(body);
        self
    }

    pub fn with_response_body(mut self, body: Value) -> Self {
        self.response.body = Some(body);
        self
    }

    pub fn with_query(mut self, query: QueryMap) -> Self {
        self.request.query = Some(query);
        self
    }

    pub fn with_path_template(
        mut self,
        template: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        self.request.path_template = Some(template.into());
        self.request.path_params = Some(params);
        self
    }

    pub fn with_duration_ms(mut self, ms: f64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Path template when one has been assigned, otherwise the raw path
    pub fn effective_path_template(&self) -> &str {
        match self.request.path_template.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => &self.request.path,
        }
    }

    /// Compact single-line JSON encoding
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Batch file wrapper: `{"version": "ir.v1", "records": [...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BatchMetadata>,
    pub records: Vec<IrRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp_z")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<RecordSource>,
    #[serde(default)]
    pub record_count: usize,
}

impl Batch {
    pub fn new(records: Vec<IrRecord>) -> Self {
        Self {
            version: IR_VERSION.to_string(),
            metadata: Some(BatchMetadata {
                generated_at: Some(Utc::now()),
                source: None,
                record_count: records.len(),
            }),
            records,
        }
    }
}

/// Strict ISO-8601 timestamps with a literal `Z` suffix
mod timestamp_z {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}
