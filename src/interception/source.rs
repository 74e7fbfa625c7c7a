// src/interception/source.rs
//! Event source capability
//!
//! An observation point such as an instrumented browser session or a proxy
//! exposes exactly two event kinds: *request-started* and
//! *response-completed*. Sources that hand out response bodies synchronously
//! implement [`EventSource`]; sources whose body retrieval must be awaited
//! implement [`AsyncEventSource`]. Everything downstream of body retrieval is
//! shared between the two.

use crate::utils::errors::Result;
use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Globally unique identifier of one observed request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw request as reported by the source
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub id: RequestId,
    pub method: String,
    pub url: String,
    /// Header pairs in wire order; names keep their original casing
    pub headers: Vec<(String, String)>,
    pub post_data: Option<Bytes>,
}

impl RequestEvent {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            url: url.into(),
            headers: vec![],
            post_data: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_post_data(mut self, body: impl Into<Bytes>) -> Self {
        self.post_data = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Case-insensitive lookup; the last occurrence wins
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Everything about a completed response except its body
pub trait ResponseHead {
    /// The request this response answers
    fn request(&self) -> &RequestEvent;

    fn status(&self) -> u16;

    fn headers(&self) -> &[(String, String)];

    fn header(&self, name: &str) -> Option<&str> {
        find_header(self.headers(), name)
    }
}

/// Response whose body is retrieved with a blocking call
pub trait ResponseEvent: ResponseHead + Send + 'static {
    fn body(&self) -> Result<Bytes>;
}

/// Response whose body retrieval must be awaited
pub trait AsyncResponseEvent: ResponseHead + Send + Sync + 'static {
    fn body(&self) -> BoxFuture<'_, Result<Bytes>>;
}

/// The two event kinds a source emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RequestStarted,
    ResponseCompleted,
}

pub type RequestHandler = Arc<dyn Fn(Arc<RequestEvent>) + Send + Sync>;
pub type ResponseHandler<R> = Arc<dyn Fn(R) + Send + Sync>;
pub type AsyncResponseHandler<R> = Arc<dyn Fn(R) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handler registration for a blocking source
pub enum Subscription<R> {
    RequestStarted(RequestHandler),
    ResponseCompleted(ResponseHandler<R>),
}

impl<R> Subscription<R> {
    pub fn kind(&self) -> EventKind {
        match self {
            Subscription::RequestStarted(_) => EventKind::RequestStarted,
            Subscription::ResponseCompleted(_) => EventKind::ResponseCompleted,
        }
    }
}

/// Handler registration for a cooperative source
pub enum AsyncSubscription<R> {
    RequestStarted(RequestHandler),
    ResponseCompleted(AsyncResponseHandler<R>),
}

impl<R> AsyncSubscription<R> {
    pub fn kind(&self) -> EventKind {
        match self {
            AsyncSubscription::RequestStarted(_) => EventKind::RequestStarted,
            AsyncSubscription::ResponseCompleted(_) => EventKind::ResponseCompleted,
        }
    }
}

/// Source that invokes handlers inline
pub trait EventSource {
    type Response: ResponseEvent;

    fn subscribe(&self, subscription: Subscription<Self::Response>);
}

/// Source whose response handlers are awaited
pub trait AsyncEventSource {
    type Response: AsyncResponseEvent;

    fn subscribe(&self, subscription: AsyncSubscription<Self::Response>);
}

/// In-process blocking source; adapters push events into it
pub struct EventHub<R> {
    request_handlers: RwLock<Vec<RequestHandler>>,
    response_handlers: RwLock<Vec<ResponseHandler<R>>>,
}

impl<R: ResponseEvent + Clone> EventHub<R> {
    pub fn new() -> Self {
        Self {
            request_handlers: RwLock::new(vec![]),
            response_handlers: RwLock::new(vec![]),
        }
    }

    pub fn emit_request(&self, request: Arc<RequestEvent>) {
        let handlers = self.request_handlers.read().clone();
        for handler in handlers {
            handler(Arc::clone(&request));
        }
    }

    pub fn emit_response(&self, response: R) {
        let handlers = self.response_handlers.read().clone();
        for handler in handlers {
            handler(response.clone());
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::RequestStarted => self.request_handlers.read().len(),
            EventKind::ResponseCompleted => self.response_handlers.read().len(),
        }
    }
}

impl<R: ResponseEvent + Clone> Default for EventHub<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ResponseEvent + Clone> EventSource for EventHub<R> {
    type Response = R;

    fn subscribe(&self, subscription: Subscription<R>) {
        match subscription {
            Subscription::RequestStarted(h) => self.request_handlers.write().push(h),
            Subscription::ResponseCompleted(h) => self.response_handlers.write().push(h),
        }
    }
}

/// In-process cooperative source
pub struct AsyncEventHub<R> {
    request_handlers: RwLock<Vec<RequestHandler>>,
    response_handlers: RwLock<Vec<AsyncResponseHandler<R>>>,
}

impl<R: AsyncResponseEvent + Clone> AsyncEventHub<R> {
    pub fn new() -> Self {
        Self {
            request_handlers: RwLock::new(vec![]),
            response_handlers: RwLock::new(vec![]),
        }
    }

    pub fn emit_request(&self, request: Arc<RequestEvent>) {
        let handlers = self.request_handlers.read().clone();
        for handler in handlers {
            handler(Arc::clone(&request));
        }
    }

    /// Future running every response handler; detached from the hub so it
    /// can be spawned
    pub fn emit_response(&self, response: R) -> impl Future<Output = ()> + Send + 'static {
        let pending: Vec<_> = self
            .response_handlers
            .read()
            .iter()
            .map(|handler| handler(response.clone()))
            .collect();

        async move {
            join_all(pending).await;
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::RequestStarted => self.request_handlers.read().len(),
            EventKind::ResponseCompleted => self.response_handlers.read().len(),
        }
    }
}

impl<R: AsyncResponseEvent + Clone> Default for AsyncEventHub<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AsyncResponseEvent + Clone> AsyncEventSource for AsyncEventHub<R> {
    type Response = R;

    fn subscribe(&self, subscription: AsyncSubscription<R>) {
        match subscription {
            AsyncSubscription::RequestStarted(h) => self.request_handlers.write().push(h),
            AsyncSubscription::ResponseCompleted(h) => self.response_handlers.write().push(h),
        }
    }
}
