// src/interception/normalizer.rs
//! Record builder
//!
//! Turns a completed request/response pair into an [`IrRecord`]. Building is
//! split in two so blocking and cooperative sources share everything except
//! body retrieval:
//!
//! ```text
//! begin(head)  → filter, skip-status, request side  → RecordDraft
//!      ↓
//! [source retrieves response body, sync or awaited]
//!      ↓
//! finish(draft, head, body) → response side        → IrRecord
//! ```

use crate::interception::filter;
use crate::interception::source::{find_header, ResponseHead};
use crate::ir::{HeaderMap, IrRecord, QueryMap, QueryValue, Request, RequestMethod, Response};
use crate::utils::config::CaptureOptions;
use crate::utils::errors::{CaptureError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;
use url::Url;

/// Result of one processing attempt
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Record built and ready for the writer
    Kept(Box<IrRecord>),
    /// Out of scope; not an error
    Dropped,
    /// Construction failed; reported to the error callback
    Failed(CaptureError),
}

/// URL split into the parts a record carries
#[derive(Debug, Clone, PartialEq)]
pub struct UrlParts {
    pub scheme: String,
    pub host: Option<String>,
    pub path: String,
    pub query: Option<QueryMap>,
}

pub fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| CaptureError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

pub fn decompose_url(url: &Url) -> UrlParts {
    let path = match url.path() {
        "" => "/".to_string(),
        p => p.to_string(),
    };

    UrlParts {
        scheme: url.scheme().to_string(),
        host: filter::hostname(url).map(str::to_string),
        path,
        query: parse_query(url),
    }
}

/// Query parameters; one occurrence is a scalar, repeats keep their order.
/// Blank values are ignored and an empty result is `None`.
pub fn parse_query(url: &Url) -> Option<QueryMap> {
    let mut query = QueryMap::new();

    for (key, value) in url.query_pairs() {
        if value.is_empty() {
            continue;
        }
        match query.get_mut(key.as_ref()) {
            Some(existing) => existing.push(value.into_owned()),
            None => {
                query.insert(key.into_owned(), QueryValue::Single(value.into_owned()));
            }
        }
    }

    (!query.is_empty()).then_some(query)
}

/// Request-side half of a record, waiting for the response body
#[derive(Debug)]
pub struct RecordDraft {
    request: Request,
    response_content_type: Option<String>,
    wants_response_body: bool,
    id: Option<String>,
    duration_ms: Option<f64>,
}

impl RecordDraft {
    /// Whether the response body should be retrieved at all
    pub fn wants_response_body(&self) -> bool {
        self.wants_response_body
    }
}

pub struct Normalizer {
    options: Arc<CaptureOptions>,
}

impl Normalizer {
    pub fn new(options: Arc<CaptureOptions>) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn should_capture(&self, method: &str, url: &Url) -> bool {
        filter::should_capture(&self.options, method, url)
    }

    /// Lower-case keys, drop excluded names; the last duplicate wins
    pub fn filter_headers(&self, headers: &[(String, String)]) -> HeaderMap {
        if !self.options.include_headers {
            return HeaderMap::new();
        }

        headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .filter(|(k, _)| !self.options.exclude_headers.contains(k))
            .map(|(k, v)| (k, v.clone()))
            .collect()
    }

    pub fn should_capture_body(&self, content_type: Option<&str>) -> bool {
        match content_type {
            Some(ct) if !ct.is_empty() => self
                .options
                .capture_content_types
                .iter()
                .any(|allowed| ct.starts_with(allowed.as_str())),
            _ => false,
        }
    }

    /// Decode a body; oversize bodies are dropped whole, never truncated
    pub fn parse_body(&self, bytes: &[u8], content_type: Option<&str>) -> Option<Value> {
        if bytes.is_empty() || bytes.len() > self.options.max_body_size {
            return None;
        }

        let text = std::str::from_utf8(bytes).ok()?;
        if content_type.is_some_and(|ct| ct.contains("json")) {
            match serde_json::from_str(text) {
                Ok(Value::Null) | Err(_) => None,
                Ok(value) => Some(value),
            }
        } else {
            Some(Value::String(text.to_string()))
        }
    }

    /// Request-side processing; `Ok(None)` means the response is out of scope
    pub fn begin(&self, head: &dyn ResponseHead, duration_ms: Option<f64>) -> Result<Option<RecordDraft>> {
        let event = head.request();
        let url = parse_url(&event.url)?;

        if !self.should_capture(&event.method, &url) {
            trace!("Filtered out {} {}", event.method, event.url);
            return Ok(None);
        }

        if self.options.skip_status_codes.contains(&head.status()) {
            trace!("Skipping status {} for {}", head.status(), event.url);
            return Ok(None);
        }

        let method: RequestMethod = event.method.parse()?;
        let parts = decompose_url(&url);
        let content_type = non_empty(event.header("content-type"));

        let body = if self.options.capture_request_body && self.should_capture_body(content_type) {
            event
                .post_data
                .as_deref()
                .and_then(|data| self.parse_body(data, content_type))
        } else {
            None
        };

        let mut request = Request::new(method, parts.path);
        request.scheme = Some(parts.scheme);
        request.host = parts.host;
        request.query = parts.query;
        request.headers = non_empty_map(self.filter_headers(&event.headers));
        request.content_type = content_type.map(str::to_string);
        request.body = body;

        let response_content_type = non_empty(head.header("content-type")).map(str::to_string);
        let wants_response_body = self.options.capture_response_body
            && self.should_capture_body(response_content_type.as_deref());

        Ok(Some(RecordDraft {
            request,
            response_content_type,
            wants_response_body,
            id: self.record_id(&event.headers),
            duration_ms,
        }))
    }

    /// Response-side processing once the body (if wanted) is available
    pub fn finish(&self, draft: RecordDraft, head: &dyn ResponseHead, body: Option<&[u8]>) -> IrRecord {
        let content_type = draft.response_content_type.as_deref();

        let mut response = Response::new(head.status());
        response.headers = non_empty_map(self.filter_headers(head.headers()));
        response.body = body.and_then(|b| self.parse_body(b, content_type));
        response.content_type = draft.response_content_type;

        let mut record = IrRecord::new(draft.request, response).with_source(self.options.source);
        if let Some(id) = draft.id {
            record = record.with_id(id);
        }
        if let Some(ms) = draft.duration_ms {
            record = record.with_duration_ms(ms);
        }
        record
    }

    /// Build a record in one step from an already-retrieved body
    pub fn build_record(
        &self,
        head: &dyn ResponseHead,
        body: Option<&[u8]>,
        duration_ms: Option<f64>,
    ) -> CaptureOutcome {
        match self.begin(head, duration_ms) {
            Ok(Some(draft)) => {
                let body = if draft.wants_response_body() { body } else { None };
                CaptureOutcome::Kept(Box::new(self.finish(draft, head, body)))
            }
            Ok(None) => CaptureOutcome::Dropped,
            Err(e) => CaptureOutcome::Failed(e),
        }
    }

    /// First non-empty value among the configured id headers
    fn record_id(&self, headers: &[(String, String)]) -> Option<String> {
        self.options
            .request_id_headers
            .iter()
            .filter_map(|name| find_header(headers, name))
            .find(|v| !v.trim().is_empty())
            .map(str::to_string)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn non_empty_map(map: HeaderMap) -> Option<HeaderMap> {
    (!map.is_empty()).then_some(map)
}
