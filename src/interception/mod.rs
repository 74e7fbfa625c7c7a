// src/interception/mod.rs
//! Traffic interception layer
//!
//! This module turns observed HTTP exchanges into IR records:
//!
//! - **Source**: event capability traits and in-process hubs
//! - **Correlation**: pending requests keyed by request id
//! - **Filter**: host/method/path capture policy
//! - **Normalizer**: URL, header and body normalization into records
//! - **Controller**: binds a source to the normalizer and a writer
//! - **HTTP Interceptor**: recording forward proxy
//!
//! # Architecture
//!
//! ```text
//! Browser session / Proxy / Test harness
//!     │
//!     ├─ request-started   → Controller → CorrelationTable
//!     └─ response-completed → Controller → Filter → Normalizer → RecordWriter
//! ```

pub mod controller;
pub mod correlation;
pub mod filter;
pub mod http_interceptor;
pub mod normalizer;
pub mod source;

// Re-export commonly used types
pub use controller::{CaptureController, CaptureStats, Disposition};
pub use correlation::{CorrelationTable, PendingCorrelation};
pub use filter::should_capture;
pub use http_interceptor::{CaptureProxy, InterceptorConfig, ProxyResponse};
pub use normalizer::{CaptureOutcome, Normalizer, RecordDraft, UrlParts};
pub use source::{
    AsyncEventHub, AsyncEventSource, AsyncResponseEvent, AsyncSubscription, EventHub, EventKind,
    EventSource, RequestEvent, RequestId, ResponseEvent, ResponseHead, Subscription,
};
