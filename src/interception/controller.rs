// src/interception/controller.rs
//! Capture controller
//!
//! Binds an event source to the normalizer and a record writer:
//!
//! ```text
//! request-started   → correlation table (keyed by request id)
//! response-completed → take correlation → sample → normalize → write
//!                                                     ↓
//!                                     Kept | Dropped | Failed → on_error
//! ```
//!
//! Nothing raised while processing one response reaches the source; failures
//! are isolated to that record and reported to the error callback.

use crate::interception::correlation::CorrelationTable;
use crate::interception::normalizer::{CaptureOutcome, Normalizer, RecordDraft};
use crate::interception::source::{
    AsyncEventSource, AsyncResponseEvent, AsyncResponseHandler, AsyncSubscription, EventSource,
    RequestEvent, ResponseEvent, ResponseHandler, ResponseHead, Subscription,
};
use crate::recording::{NdjsonWriter, RecordWriter};
use crate::utils::config::CaptureOptions;
use crate::utils::errors::{CaptureError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happened to one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Written,
    Dropped,
    Failed,
}

/// Controller counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub written: u64,
    pub dropped: u64,
    pub sampled_out: u64,
    pub failed: u64,
}

pub struct CaptureController {
    normalizer: Normalizer,
    correlations: CorrelationTable,
    writer: Arc<dyn RecordWriter>,
    closed: AtomicBool,
    written: AtomicU64,
    dropped: AtomicU64,
    sampled_out: AtomicU64,
    failed: AtomicU64,
}

impl CaptureController {
    /// Open the configured output file and build a controller writing to it
    pub fn new(options: CaptureOptions) -> Result<Arc<Self>> {
        let writer = NdjsonWriter::create_with(options.output(), options.sink_format())?
            .with_flush_interval(options.flush_interval());

        info!(
            "Capturing to {} ({:?})",
            options.output().display(),
            options.sink_format()
        );

        Ok(Self::with_writer(options, Arc::new(writer)))
    }

    /// Build a controller over an existing writer
    pub fn with_writer(options: CaptureOptions, writer: Arc<dyn RecordWriter>) -> Arc<Self> {
        Arc::new(Self {
            normalizer: Normalizer::new(Arc::new(options)),
            correlations: CorrelationTable::new(),
            writer,
            closed: AtomicBool::new(false),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            sampled_out: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Subscribe to a source that invokes handlers inline
    pub fn attach<S: EventSource + ?Sized>(self: &Arc<Self>, source: &S) {
        let controller = Arc::clone(self);
        source.subscribe(Subscription::RequestStarted(Arc::new(
            move |request: Arc<RequestEvent>| controller.on_request(request),
        )));

        let controller = Arc::clone(self);
        let on_response: ResponseHandler<S::Response> = Arc::new(move |response: S::Response| {
            controller.on_response(response);
        });
        source.subscribe(Subscription::ResponseCompleted(on_response));

        debug!("Attached to blocking event source");
    }

    /// Subscribe to a source whose response handlers are awaited
    pub fn attach_async<S: AsyncEventSource + ?Sized>(self: &Arc<Self>, source: &S) {
        let controller = Arc::clone(self);
        source.subscribe(AsyncSubscription::RequestStarted(Arc::new(
            move |request: Arc<RequestEvent>| controller.on_request(request),
        )));

        let controller = Arc::clone(self);
        let on_response: AsyncResponseHandler<S::Response> =
            Arc::new(move |response: S::Response| -> BoxFuture<'static, ()> {
                let controller = Arc::clone(&controller);
                Box::pin(async move {
                    controller.on_response_async(response).await;
                })
            });
        source.subscribe(AsyncSubscription::ResponseCompleted(on_response));

        debug!("Attached to cooperative event source");
    }

    pub fn on_request(&self, request: Arc<RequestEvent>) {
        self.correlations.insert(request);
        metrics::gauge!("capture_pending_correlations").set(self.correlations.len() as f64);
    }

    /// Process a response from a blocking source
    pub fn on_response<R: ResponseEvent>(&self, response: R) -> Disposition {
        let draft = match self.prepare(&response) {
            Ok(Some(draft)) => draft,
            Ok(None) => return self.dispatch(CaptureOutcome::Dropped),
            Err(e) => return self.dispatch(CaptureOutcome::Failed(e)),
        };

        let body = if draft.wants_response_body() {
            response.body().map(Some)
        } else {
            Ok(None)
        };

        let outcome = self.complete(draft, &response, body);
        self.dispatch(outcome)
    }

    /// Process a response from a cooperative source
    pub async fn on_response_async<R: AsyncResponseEvent>(&self, response: R) -> Disposition {
        let draft = match self.prepare(&response) {
            Ok(Some(draft)) => draft,
            Ok(None) => return self.dispatch(CaptureOutcome::Dropped),
            Err(e) => return self.dispatch(CaptureOutcome::Failed(e)),
        };

        let body = if draft.wants_response_body() {
            response.body().await.map(Some)
        } else {
            Ok(None)
        };

        let outcome = self.complete(draft, &response, body);
        self.dispatch(outcome)
    }

    /// Shared request-side step: correlation, sampling, filtering
    fn prepare(&self, head: &dyn ResponseHead) -> Result<Option<RecordDraft>> {
        let duration_ms = self
            .correlations
            .take(&head.request().id)
            .map(|pending| pending.elapsed_ms(Instant::now()));
        metrics::gauge!("capture_pending_correlations").set(self.correlations.len() as f64);

        let Some(draft) = self.normalizer.begin(head, duration_ms)? else {
            return Ok(None);
        };

        if self.sampled_out() {
            self.sampled_out.fetch_add(1, Ordering::Relaxed);
            debug!("Sampled out {}", head.request().url);
            return Ok(None);
        }

        Ok(Some(draft))
    }

    fn complete(
        &self,
        draft: RecordDraft,
        head: &dyn ResponseHead,
        body: Result<Option<Bytes>>,
    ) -> CaptureOutcome {
        match body {
            Ok(body) => CaptureOutcome::Kept(Box::new(self.normalizer.finish(
                draft,
                head,
                body.as_deref(),
            ))),
            Err(e) => CaptureOutcome::Failed(e),
        }
    }

    fn sampled_out(&self) -> bool {
        let rate = self.normalizer.options().sample_rate();
        rate > 0.0 && rate < 1.0 && rand::random::<f64>() >= rate
    }

    fn dispatch(&self, outcome: CaptureOutcome) -> Disposition {
        match outcome {
            CaptureOutcome::Kept(record) => match self.writer.write(&record) {
                Ok(()) => {
                    self.written.fetch_add(1, Ordering::SeqCst);
                    metrics::counter!("capture_records_written_total").increment(1);
                    debug!(
                        "Captured {} {} -> {}",
                        record.request.method, record.request.path, record.response.status
                    );
                    Disposition::Written
                }
                Err(e) => self.report(e),
            },
            CaptureOutcome::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("capture_records_dropped_total").increment(1);
                Disposition::Dropped
            }
            CaptureOutcome::Failed(e) => self.report(e),
        }
    }

    fn report(&self, error: CaptureError) -> Disposition {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("capture_records_failed_total").increment(1);
        warn!("Failed to capture record: {}", error);

        if let Some(callback) = self.normalizer.options().on_error() {
            callback(&error);
        }
        Disposition::Failed
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    /// Flush and close the writer; later calls are no-ops
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.writer.close();
        info!(
            "Capture closed: {} records written, {} correlations orphaned",
            self.count(),
            self.correlations.len()
        );
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Records actually written
    pub fn count(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Requests started but not yet completed
    pub fn pending(&self) -> usize {
        self.correlations.len()
    }

    pub fn options(&self) -> &CaptureOptions {
        self.normalizer.options()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            written: self.count(),
            dropped: self.dropped.load(Ordering::Relaxed),
            sampled_out: self.sampled_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::normalizer::tests::FakeResponse;
    use crate::interception::source::{AsyncEventHub, EventHub};
    use crate::ir::{read_bytes, RequestMethod};
    use crate::recording::writer::tests::SharedBuffer;
    use crate::utils::config::CaptureOptionsBuilder;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn controller_with(builder: CaptureOptionsBuilder) -> (Arc<CaptureController>, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let writer: Arc<dyn RecordWriter> = Arc::new(NdjsonWriter::plain(buffer.clone()));
        (
            CaptureController::with_writer(builder.build().unwrap(), writer),
            buffer,
        )
    }

    fn collecting_errors(builder: CaptureOptionsBuilder) -> (CaptureOptionsBuilder, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let builder = builder.on_error(move |e: &CaptureError| sink.lock().push(e.to_string()));
        (builder, errors)
    }

    #[derive(Clone)]
    struct AsyncFake(FakeResponse);

    impl ResponseHead for AsyncFake {
        fn request(&self) -> &RequestEvent {
            &self.0.request
        }

        fn status(&self) -> u16 {
            self.0.status
        }

        fn headers(&self) -> &[(String, String)] {
            &self.0.headers
        }
    }

    impl AsyncResponseEvent for AsyncFake {
        fn body(&self) -> BoxFuture<'_, Result<Bytes>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                ResponseEvent::body(&self.0)
            })
        }
    }

    #[test]
    fn test_sync_source_end_to_end() {
        let (controller, buffer) = controller_with(CaptureOptions::builder("out"));
        let hub: EventHub<FakeResponse> = EventHub::new();
        controller.attach(&hub);

        let request = RequestEvent::new(1u64, "GET", "https://api.example.com/users?page=1");
        hub.emit_request(Arc::new(request.clone()));
        assert_eq!(controller.pending(), 1);

        std::thread::sleep(Duration::from_millis(5));
        hub.emit_response(FakeResponse::json(request, 200, r#"[{"id":1}]"#));

        assert_eq!(controller.count(), 1);
        assert_eq!(controller.pending(), 0);
        controller.close().unwrap();

        let records = read_bytes(&buffer.contents()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request.method, RequestMethod::Get);
        assert_eq!(records[0].response.body, Some(serde_json::json!([{"id": 1}])));
        assert!(records[0].duration_ms.unwrap() >= 5.0);
    }

    #[test]
    fn test_same_url_keeps_separate_timings() {
        let (controller, buffer) = controller_with(CaptureOptions::builder("out"));

        let first = RequestEvent::new(1u64, "GET", "http://h/same");
        let second = RequestEvent::new(2u64, "GET", "http://h/same");
        controller.on_request(Arc::new(first.clone()));
        std::thread::sleep(Duration::from_millis(20));
        controller.on_request(Arc::new(second.clone()));

        controller.on_response(FakeResponse::json(first, 200, "{}"));
        controller.on_response(FakeResponse::json(second, 200, "{}"));
        controller.close().unwrap();

        let records = read_bytes(&buffer.contents()).unwrap();
        let first_ms = records[0].duration_ms.unwrap();
        let second_ms = records[1].duration_ms.unwrap();
        assert!(first_ms >= 20.0);
        assert!(first_ms > second_ms);
    }

    #[test]
    fn test_uncorrelated_response_has_no_duration() {
        let (controller, buffer) = controller_with(CaptureOptions::builder("out"));

        let request = RequestEvent::new(9u64, "GET", "http://h/late");
        assert_eq!(
            controller.on_response(FakeResponse::json(request, 200, "{}")),
            Disposition::Written
        );
        controller.close().unwrap();

        let records = read_bytes(&buffer.contents()).unwrap();
        assert!(records[0].duration_ms.is_none());
    }

    #[test]
    fn test_filtered_is_silent() {
        let (builder, errors) =
            collecting_errors(CaptureOptions::builder("out").exclude_paths(["/health"]));
        let (controller, buffer) = controller_with(builder);

        let request = RequestEvent::new(1u64, "GET", "http://h/health");
        controller.on_request(Arc::new(request.clone()));
        assert_eq!(
            controller.on_response(FakeResponse::json(request, 200, "{}")),
            Disposition::Dropped
        );

        assert_eq!(controller.count(), 0);
        assert_eq!(controller.pending(), 0);
        assert!(errors.lock().is_empty());
        assert!(buffer.contents().is_empty());
    }

    #[test]
    fn test_failures_isolated() {
        let (builder, errors) = collecting_errors(CaptureOptions::builder("out"));
        let (controller, _buffer) = controller_with(builder);

        let mut broken = FakeResponse::json(RequestEvent::new(1u64, "GET", "http://h/a"), 200, "");
        broken.body = None;
        assert_eq!(controller.on_response(broken), Disposition::Failed);

        let bad_url = FakeResponse::json(RequestEvent::new(2u64, "GET", "::"), 200, "{}");
        assert_eq!(controller.on_response(bad_url), Disposition::Failed);

        let ok = FakeResponse::json(RequestEvent::new(3u64, "GET", "http://h/b"), 200, "{}");
        assert_eq!(controller.on_response(ok), Disposition::Written);

        assert_eq!(errors.lock().len(), 2);
        assert_eq!(
            controller.stats(),
            CaptureStats {
                written: 1,
                dropped: 0,
                sampled_out: 0,
                failed: 2
            }
        );
    }

    #[test]
    fn test_unwanted_body_never_retrieved() {
        let (builder, errors) = collecting_errors(CaptureOptions::builder("out"));
        let (controller, _buffer) = controller_with(builder);

        let mut image = FakeResponse::json(RequestEvent::new(1u64, "GET", "http://h/logo"), 200, "");
        image.headers = vec![("content-type".to_string(), "image/png".to_string())];
        image.body = None;

        assert_eq!(controller.on_response(image), Disposition::Written);
        assert!(errors.lock().is_empty());
    }

    #[test]
    fn test_close_idempotent_and_late_events_reported() {
        let (builder, errors) = collecting_errors(CaptureOptions::builder("out"));
        let (controller, _buffer) = controller_with(builder);

        controller.close().unwrap();
        controller.close().unwrap();
        assert!(controller.is_closed());

        let late = FakeResponse::json(RequestEvent::new(1u64, "GET", "http://h/x"), 200, "{}");
        assert_eq!(controller.on_response(late), Disposition::Failed);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(controller.count(), 0);
    }

    #[test]
    fn test_zero_sample_rate_captures_all() {
        let (controller, _buffer) = controller_with(CaptureOptions::builder("out").sample_rate(0.0));

        for i in 0..20u64 {
            let request = RequestEvent::new(i, "GET", "http://h/s");
            controller.on_response(FakeResponse::json(request, 200, "{}"));
        }
        assert_eq!(controller.count(), 20);
    }

    #[tokio::test]
    async fn test_async_source() {
        let (controller, buffer) = controller_with(CaptureOptions::builder("out"));
        let hub: AsyncEventHub<AsyncFake> = AsyncEventHub::new();
        controller.attach_async(&hub);

        let request = RequestEvent::new(5u64, "POST", "http://h/items")
            .with_header("content-type", "application/json")
            .with_post_data(r#"{"name":"x"}"#);
        hub.emit_request(Arc::new(request.clone()));
        hub.emit_response(AsyncFake(FakeResponse::json(request, 201, r#"{"id":5}"#)))
            .await;

        assert_eq!(controller.count(), 1);
        controller.close().unwrap();

        let records = read_bytes(&buffer.contents()).unwrap();
        assert_eq!(records[0].request.body, Some(serde_json::json!({"name": "x"})));
        assert_eq!(records[0].response.body, Some(serde_json::json!({"id": 5})));
        assert!(records[0].duration_ms.is_some());
    }
}
