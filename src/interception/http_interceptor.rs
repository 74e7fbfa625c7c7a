// src/interception/http_interceptor.rs
//! Recording HTTP proxy
//!
//! Plain-HTTP forward proxy that relays traffic upstream unchanged and
//! publishes every exchange as request-started/response-completed events.
//! Clients either send absolute-form request targets or origin-form targets
//! with a `Host` header. `CONNECT` tunnelling is refused, so HTTPS traffic
//! is never observed.
//!
//! Connection tasks and event deliveries are tracked; `serve` returns only
//! after in-flight exchanges finish and their events have been handled.

use crate::interception::source::{
    AsyncEventHub, AsyncEventSource, AsyncResponseEvent, AsyncSubscription, RequestEvent,
    RequestId, ResponseHead,
};
use crate::utils::config::ProxyConfig;
use crate::utils::errors::{CaptureError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Connection-scoped headers never relayed
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Configuration for the recording proxy
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Proxy listen address
    pub listen_addr: SocketAddr,

    /// Upper bound on one upstream exchange
    pub upstream_timeout: Duration,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8899)),
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

impl InterceptorConfig {
    pub fn from_proxy_config(config: &ProxyConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listen_addr = addr
            .parse()
            .map_err(|e| CaptureError::Config(format!("invalid proxy address {}: {}", addr, e)))?;

        Ok(Self {
            listen_addr,
            upstream_timeout: Duration::from_secs(config.upstream_timeout_secs),
        })
    }
}

/// A relayed response with its body already buffered
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    request: Arc<RequestEvent>,
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl ResponseHead for ProxyResponse {
    fn request(&self) -> &RequestEvent {
        &self.request
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

impl AsyncResponseEvent for ProxyResponse {
    fn body(&self) -> BoxFuture<'_, Result<Bytes>> {
        let body = self.body.clone();
        Box::pin(async move { Ok(body) })
    }
}

/// Recording forward proxy
pub struct CaptureProxy {
    config: InterceptorConfig,
    hub: AsyncEventHub<ProxyResponse>,
    http_client: Client<HttpConnector, Full<Bytes>>,
    next_id: AtomicU64,
    tasks: TaskTracker,
}

impl CaptureProxy {
    pub fn new(config: InterceptorConfig) -> Self {
        let http_client = Client::builder(TokioExecutor::new()).build_http();

        Self {
            config,
            hub: AsyncEventHub::new(),
            http_client,
            next_id: AtomicU64::new(1),
            tasks: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.listen_addr).await.map_err(|e| {
            CaptureError::InterceptionFailed(format!("Failed to bind proxy: {}", e))
        })
    }

    /// Bind and serve until the process exits
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Accept connections on `listener` until `shutdown` resolves, then drain
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Recording proxy listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);
        let stop = CancellationToken::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let proxy = Arc::clone(&self);
                        let stop = stop.clone();

                        self.tasks.spawn(async move {
                            debug!("Accepted connection from {}", addr);

                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let proxy = Arc::clone(&proxy);
                                async move { proxy.handle_request(req).await }
                            });

                            let conn = http1::Builder::new().serve_connection(io, service);
                            tokio::pin!(conn);

                            let served = tokio::select! {
                                served = conn.as_mut() => served,
                                _ = stop.cancelled() => {
                                    // Finish the exchange in flight, then hang up
                                    conn.as_mut().graceful_shutdown();
                                    conn.await
                                }
                            };
                            if let Err(e) = served {
                                error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        stop.cancel();
        self.tasks.close();
        info!(
            "Recording proxy shutting down, draining {} tasks",
            self.tasks.len()
        );
        self.tasks.wait().await;
        self.tasks.reopen();

        Ok(())
    }

    /// Number of tracked connection and delivery tasks still running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        if req.method() == Method::CONNECT {
            warn!("Refusing CONNECT to {}", req.uri());
            return Ok(error_response(
                StatusCode::NOT_IMPLEMENTED,
                "CONNECT tunnelling is not supported",
            ));
        }

        match self.forward(req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("Failed to relay request: {}", e);
                Ok(error_response(StatusCode::BAD_GATEWAY, "Upstream request failed"))
            }
        }
    }

    /// Relay one exchange upstream and publish it
    async fn forward(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let (parts, body) = req.into_parts();

        let url = absolute_url(&parts.uri, &parts.headers).ok_or_else(|| {
            CaptureError::InterceptionFailed(format!("no host for request {}", parts.uri))
        })?;

        let body = body
            .collect()
            .await
            .map_err(|e| CaptureError::InterceptionFailed(format!("Body read error: {}", e)))?
            .to_bytes();

        let event = Arc::new(RequestEvent {
            id: self.next_request_id(),
            method: parts.method.to_string(),
            url: url.clone(),
            headers: header_pairs(&parts.headers),
            post_data: (!body.is_empty()).then(|| body.clone()),
        });
        debug!("Relaying {} {} ({})", event.method, url, event.id);
        self.hub.emit_request(Arc::clone(&event));

        let mut builder = Request::builder().method(parts.method.clone()).uri(url.as_str());
        for (name, value) in relayable(&parts.headers) {
            builder = builder.header(name, value);
        }
        let upstream_req = builder
            .body(Full::new(body))
            .map_err(|e| CaptureError::InterceptionFailed(format!("Request build error: {}", e)))?;

        let response = tokio::time::timeout(
            self.config.upstream_timeout,
            self.http_client.request(upstream_req),
        )
        .await
        .map_err(|_| CaptureError::InterceptionFailed(format!("Upstream timed out: {}", url)))?
        .map_err(|e| CaptureError::InterceptionFailed(format!("Upstream request failed: {}", e)))?;

        let (mut parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| CaptureError::InterceptionFailed(format!("Response body error: {}", e)))?
            .to_bytes();

        for name in HOP_BY_HOP {
            parts.headers.remove(name);
        }

        let observed = ProxyResponse {
            request: event,
            status: parts.status.as_u16(),
            headers: header_pairs(&parts.headers),
            body: body.clone(),
        };
        self.tasks.spawn(self.hub.emit_response(observed));

        Ok(Response::from_parts(parts, Full::new(body)))
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl AsyncEventSource for CaptureProxy {
    type Response = ProxyResponse;

    fn subscribe(&self, subscription: AsyncSubscription<ProxyResponse>) {
        self.hub.subscribe(subscription);
    }
}

/// Absolute target URL from the request line or the `Host` header
fn absolute_url(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Some(uri.to_string());
    }

    let host = headers.get(HOST)?.to_str().ok()?;
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Some(format!("http://{}{}", host, path))
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn relayable(headers: &HeaderMap) -> impl Iterator<Item = (&hyper::header::HeaderName, &hyper::header::HeaderValue)> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::controller::CaptureController;
    use crate::ir::{read_bytes, QueryValue, RecordSource, RequestMethod};
    use crate::recording::writer::tests::SharedBuffer;
    use crate::recording::{NdjsonWriter, RecordWriter};
    use crate::utils::config::CaptureOptions;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn spawn_upstream() -> SocketAddr {
        spawn_slow_upstream(Duration::ZERO).await
    }

    async fn spawn_slow_upstream(delay: Duration) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| async move {
                        tokio::time::sleep(delay).await;
                        let body = req.into_body().collect().await?.to_bytes();
                        let mut response = Response::new(Full::new(Bytes::from(format!(
                            r#"{{"received":{}}}"#,
                            body.len()
                        ))));
                        *response.status_mut() = StatusCode::CREATED;
                        response
                            .headers_mut()
                            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                        Ok::<_, hyper::Error>(response)
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        addr
    }

    async fn spawn_proxy(proxy: Arc<CaptureProxy>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(proxy.serve(listener, std::future::pending()));
        addr
    }

    #[test]
    fn test_absolute_url() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("api.local:8080"));

        let origin: Uri = "/v1/items?x=1".parse().unwrap();
        assert_eq!(
            absolute_url(&origin, &headers).as_deref(),
            Some("http://api.local:8080/v1/items?x=1")
        );

        let absolute: Uri = "http://other.local/a".parse().unwrap();
        assert_eq!(
            absolute_url(&absolute, &headers).as_deref(),
            Some("http://other.local/a")
        );

        assert!(absolute_url(&origin, &HeaderMap::new()).is_none());
    }

    #[test]
    fn test_config_from_proxy_config() {
        let config = InterceptorConfig::from_proxy_config(&ProxyConfig {
            host: "0.0.0.0".to_string(),
            port: 9100,
            upstream_timeout_secs: 5,
        })
        .unwrap();

        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));

        let bad = ProxyConfig {
            host: "not an address".to_string(),
            ..Default::default()
        };
        assert!(InterceptorConfig::from_proxy_config(&bad).is_err());
    }

    #[tokio::test]
    async fn test_records_relayed_exchange() {
        let upstream = spawn_upstream().await;

        let buffer = SharedBuffer::default();
        let controller = recording_controller(&buffer);

        let proxy = Arc::new(CaptureProxy::new(InterceptorConfig::default()));
        controller.attach_async(proxy.as_ref());
        let proxy_addr = spawn_proxy(proxy).await;

        let body = r#"{"name":"ada"}"#;
        let raw = format!(
            "POST /users?role=admin HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nAuthorization: Bearer t\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            upstream,
            body.len(),
            body
        );
        let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 201"), "unexpected reply: {}", reply);

        for _ in 0..100 {
            if controller.count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(controller.count(), 1);
        assert_eq!(controller.pending(), 0);
        controller.close().unwrap();

        let records = read_bytes(&buffer.contents()).unwrap();
        let record = &records[0];
        assert_eq!(record.request.method, RequestMethod::Post);
        assert_eq!(record.request.path, "/users");
        assert_eq!(record.request.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(
            record.request.query.as_ref().unwrap()["role"],
            QueryValue::Single("admin".to_string())
        );
        assert_eq!(record.request.body, Some(serde_json::json!({"name": "ada"})));
        assert!(!record.request.headers.as_ref().unwrap().contains_key("authorization"));
        assert_eq!(record.response.status, 201);
        assert_eq!(record.response.body, Some(serde_json::json!({"received": 14})));
        assert_eq!(record.source, Some(RecordSource::Proxy));
        assert!(record.duration_ms.is_some());
    }

    fn recording_controller(buffer: &SharedBuffer) -> Arc<CaptureController> {
        let writer: Arc<dyn RecordWriter> = Arc::new(NdjsonWriter::plain(buffer.clone()));
        let options = CaptureOptions::builder("out")
            .source(RecordSource::Proxy)
            .build()
            .unwrap();
        CaptureController::with_writer(options, writer)
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_exchange() {
        let upstream = spawn_slow_upstream(Duration::from_millis(200)).await;

        let buffer = SharedBuffer::default();
        let controller = recording_controller(&buffer);
        let proxy = Arc::new(CaptureProxy::new(InterceptorConfig::default()));
        controller.attach_async(proxy.as_ref());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let served = tokio::spawn(Arc::clone(&proxy).serve(listener, async move {
            let _ = stop_rx.await;
        }));

        let client = tokio::spawn(async move {
            let raw = format!(
                "GET /slow HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
                upstream
            );
            let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
            stream.write_all(raw.as_bytes()).await.unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).await.unwrap();
            reply
        });

        // Shut down while the upstream is still answering
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();
        served.await.unwrap().unwrap();

        // Every observed exchange was handled before serve returned
        assert_eq!(proxy.in_flight(), 0);
        assert_eq!(controller.count(), 1);
        controller.close().unwrap();

        let reply = client.await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 201"), "unexpected reply: {}", reply);

        let records = read_bytes(&buffer.contents()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request.path, "/slow");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let proxy = Arc::new(CaptureProxy::new(InterceptorConfig::default()));
        let proxy_addr = spawn_proxy(proxy).await;

        let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
        stream
            .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 501"));
    }
}
