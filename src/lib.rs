//! # Spigot
//!
//! An Axum middleware that emits one structured [`tracing`] line per
//! request, carrying status, latency, request id, method, URI, host and
//! client address, plus optional header and body dumps.
//!
//! ## Features
//!
//! - **Status-driven severity**: 5xx requests log as errors, 4xx as
//!   warnings, everything else as info, each with a stable message text
//! - **Body dumps with replay**: request bodies are captured and replayed
//!   so handlers still read the full stream; response bodies are teed
//!   while they stream to the client
//! - **UTF-8-safe size limits**: dumped bodies are cut to a byte budget
//!   without ever splitting a character
//! - **Redaction hooks**: per-request skip and body-redaction predicates,
//!   plus path patterns that suppress either side's body
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use spigot::{RequestLoggerLayer, RequestLoggerConfig};
//!
//! async fn hello() -> &'static str {
//!     "Hello, World!"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     tracing_subscriber::fmt().init();
//!
//!     let config = RequestLoggerConfig {
//!         dump_headers: true,
//!         dump_body: true,
//!         ..Default::default()
//!     };
//!
//!     let app = Router::new()
//!         .route("/hello", get(hello))
//!         .layer(RequestLoggerLayer::new(config));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Redaction
//!
//! Bodies that must never reach the logs can be suppressed per request
//! with a [`BodySkipper`], or per route with path patterns:
//!
//! ```rust
//! use std::sync::Arc;
//! use axum::extract::Request;
//! use spigot::RequestLoggerConfig;
//!
//! let config = RequestLoggerConfig {
//!     dump_body: true,
//!     // redact both sides for token exchanges
//!     body_skipper: Some(Arc::new(|req: &Request| {
//!         let sensitive = req.uri().path() == "/oauth/token";
//!         (sensitive, sensitive)
//!     })),
//!     // never log response bodies for downloads
//!     exclude_response_body_paths: vec!["^/files/".into()],
//!     ..Default::default()
//! };
//! # let _ = config;
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::response::Response;
use regex::Regex;
use tower::{Layer, Service};
use tracing::warn;

mod capture;
mod limit;
mod record;

use record::{LogRecord, RequestInfo};

/// Byte budget applied to dumped bodies when none is configured.
pub const DEFAULT_BODY_LIMIT: usize = 1024;

/// Per-request predicate that bypasses the middleware entirely when it
/// returns `true`: no capture, no log line.
pub type Skipper = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Per-request predicate deciding whether to redact the request body and
/// the response body, in that order. Redacted bodies are still captured
/// and replayed; only the log output is replaced.
pub type BodySkipper = Arc<dyn Fn(&Request) -> (bool, bool) + Send + Sync>;

/// Configuration for the request logging middleware.
///
/// The default logs request metadata only: no headers, no bodies, body
/// limiting on at [`DEFAULT_BODY_LIMIT`] should dumps be enabled.
///
/// # Examples
///
/// ```rust
/// use spigot::RequestLoggerConfig;
///
/// // Default configuration
/// let config = RequestLoggerConfig::default();
///
/// // Dump everything, keeping dumped bodies under 4 KiB
/// let config = RequestLoggerConfig {
///     dump_headers: true,
///     dump_body: true,
///     body_limit: 4096,
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct RequestLoggerConfig {
    /// Skips logging entirely for matching requests.
    pub skipper: Option<Skipper>,
    /// Redacts the request and/or response body for matching requests.
    pub body_skipper: Option<BodySkipper>,
    /// Whether to include request and response headers in the log line.
    pub dump_headers: bool,
    /// Whether to capture and include request and response bodies.
    pub dump_body: bool,
    /// Whether dumped bodies are cut down to `body_limit` bytes.
    pub limit_body: bool,
    /// Byte budget for each dumped body. Zero disables limiting.
    pub body_limit: usize,
    /// Request-body redaction by path: regex patterns matched against the
    /// raw request path, or literal route templates such as `/users/{id}`.
    pub exclude_request_body_paths: Vec<String>,
    /// Response-body redaction by path, same matching rules.
    pub exclude_response_body_paths: Vec<String>,
}

impl Default for RequestLoggerConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            body_skipper: None,
            dump_headers: false,
            dump_body: false,
            limit_body: true,
            body_limit: DEFAULT_BODY_LIMIT,
            exclude_request_body_paths: Vec::new(),
            exclude_response_body_paths: Vec::new(),
        }
    }
}

impl fmt::Debug for RequestLoggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLoggerConfig")
            .field("skipper", &self.skipper.is_some())
            .field("body_skipper", &self.body_skipper.is_some())
            .field("dump_headers", &self.dump_headers)
            .field("dump_body", &self.dump_body)
            .field("limit_body", &self.limit_body)
            .field("body_limit", &self.body_limit)
            .field("exclude_request_body_paths", &self.exclude_request_body_paths)
            .field("exclude_response_body_paths", &self.exclude_response_body_paths)
            .finish()
    }
}

/// Configuration plus the exclusion patterns, compiled once per layer.
struct Shared {
    config: RequestLoggerConfig,
    exclude_request_body: Vec<Regex>,
    exclude_response_body: Vec<Regex>,
}

impl Shared {
    fn new(config: RequestLoggerConfig) -> Self {
        let exclude_request_body =
            compile_patterns(&config.exclude_request_body_paths, config.dump_body);
        let exclude_response_body =
            compile_patterns(&config.exclude_response_body_paths, config.dump_body);
        Self {
            config,
            exclude_request_body,
            exclude_response_body,
        }
    }
}

/// Compiles the configured patterns, warning about and skipping any that
/// do not parse. Nothing is compiled while body dumping is off.
fn compile_patterns(paths: &[String], dump_body: bool) -> Vec<Regex> {
    if !dump_body {
        return Vec::new();
    }
    paths
        .iter()
        .filter_map(|path| match Regex::new(path) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(path = %path, error = %err, "skipping unparsable body exclusion pattern");
                None
            }
        })
        .collect()
}

/// A body side is excluded when the matched route template equals one of
/// the configured entries verbatim, or the raw path matches one of the
/// compiled patterns.
fn is_excluded(path: &str, endpoint: Option<&str>, patterns: &[Regex], entries: &[String]) -> bool {
    if let Some(endpoint) = endpoint {
        if entries.iter().any(|entry| entry == endpoint) {
            return true;
        }
    }
    patterns.iter().any(|pattern| pattern.is_match(path))
}

/// Per-side body redaction for this request: the configured predicate
/// first, then the path exclusions.
fn body_skips(shared: &Shared, request: &Request) -> (bool, bool) {
    let (skip_req, skip_resp) = match &shared.config.body_skipper {
        Some(body_skipper) => body_skipper(request),
        None => (false, false),
    };

    let path = request.uri().path();
    let endpoint = request.extensions().get::<MatchedPath>().map(|m| m.as_str());

    (
        skip_req
            || is_excluded(
                path,
                endpoint,
                &shared.exclude_request_body,
                &shared.config.exclude_request_body_paths,
            ),
        skip_resp
            || is_excluded(
                path,
                endpoint,
                &shared.exclude_response_body,
                &shared.config.exclude_response_body_paths,
            ),
    )
}

/// Renders one captured body for the log line: the redaction marker when
/// the side is excluded and anything was captured, otherwise the captured
/// bytes under the truncation policy.
fn dumped_body(shared: &Shared, captured: &[u8], excluded: bool) -> String {
    if excluded && !captured.is_empty() {
        return record::EXCLUDED_BODY.to_owned();
    }
    let text = String::from_utf8_lossy(captured);
    limit::limit_body(&shared.config, &text).into_owned()
}

/// Warns if a request never produced a response: the downstream service
/// returned an error, or the in-flight future was dropped mid-call.
struct CommitGuard {
    pending: Option<(RequestInfo, Instant)>,
}

impl CommitGuard {
    fn new(info: RequestInfo, start: Instant) -> Self {
        Self {
            pending: Some((info, start)),
        }
    }

    fn defuse(mut self) {
        self.pending = None;
    }
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        if let Some((info, start)) = self.pending.take() {
            record::emit_not_committed(&info, start.elapsed(), None);
        }
    }
}

/// Tower layer for the request logging middleware.
///
/// This is the main entry point. It implements the Tower [`Layer`] trait
/// and slots into Axum's layering system; place it after any middleware
/// that stamps `x-request-id` so the id lands in the log line.
///
/// # Examples
///
/// ```rust,no_run
/// use spigot::{RequestLoggerLayer, RequestLoggerConfig};
/// use axum::{routing::get, Router};
/// use tower::ServiceBuilder;
///
/// # async fn hello() -> &'static str { "Hello" }
/// # #[tokio::main]
/// # async fn main() {
/// let layer = RequestLoggerLayer::new(RequestLoggerConfig::default());
///
/// let app = Router::new()
///     .route("/hello", get(hello))
///     .layer(ServiceBuilder::new().layer(layer));
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
/// axum::serve(listener, app).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct RequestLoggerLayer {
    shared: Arc<Shared>,
}

impl RequestLoggerLayer {
    /// Creates the layer. Body-exclusion patterns are compiled here;
    /// any that fail to parse are warned about and dropped.
    pub fn new(config: RequestLoggerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }
}

impl Default for RequestLoggerLayer {
    /// Layer over [`RequestLoggerConfig::default`].
    fn default() -> Self {
        Self::new(RequestLoggerConfig::default())
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggerService {
            inner,
            shared: self.shared.clone(),
        }
    }
}

/// Tower service implementation for the request logging middleware.
///
/// Wraps an inner service and logs each request that flows through it.
/// When body dumping is off the line is emitted as soon as the inner
/// service responds; with dumping on, emission waits until the response
/// body has finished streaming so the dump is complete.
///
/// Users typically don't interact with this type directly - it's created
/// by [`RequestLoggerLayer`].
#[derive(Clone)]
pub struct RequestLoggerService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> Service<Request> for RequestLoggerService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        // take the service that was driven to readiness, leave the clone
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let shared = self.shared.clone();

        Box::pin(async move {
            if let Some(skipper) = &shared.config.skipper {
                if skipper(&request) {
                    return inner.call(request).await;
                }
            }

            let start = Instant::now();

            let info = RequestInfo {
                request_id: record::request_id_from(request.headers()).unwrap_or_default(),
                method: request.method().clone(),
                uri: request.uri().clone(),
                host: record::host_of(request.uri(), request.headers()),
                remote_ip: record::real_ip(&request),
            };
            let req_headers = shared.config.dump_headers.then(|| request.headers().clone());

            // Armed before the body is read: the request can be
            // abandoned while its body is still arriving.
            let guard = CommitGuard::new(info.clone(), start);

            // With body dumping on, the request body has to be buffered
            // before the inner service consumes it.
            let captured = if shared.config.dump_body {
                let (skip_req, skip_resp) = body_skips(&shared, &request);
                let bytes = capture::capture_request_body(&mut request).await;
                Some((bytes, skip_req, skip_resp))
            } else {
                None
            };

            let result = inner.call(request).await;

            match result {
                Ok(mut response) => {
                    guard.defuse();

                    let status = response.status().as_u16();
                    let resp_headers = shared
                        .config
                        .dump_headers
                        .then(|| response.headers().clone());

                    let mut info = info;
                    if info.request_id.is_empty() {
                        if let Some(id) = record::request_id_from(response.headers()) {
                            info.request_id = id;
                        }
                    }

                    let emit_record = move |req_body: Option<String>, resp_body: Option<String>| {
                        LogRecord {
                            status,
                            latency: start.elapsed(),
                            request_id: info.request_id,
                            method: info.method,
                            uri: info.uri,
                            host: info.host,
                            remote_ip: info.remote_ip,
                            req_headers,
                            resp_headers,
                            req_body,
                            resp_body,
                        }
                        .emit();
                    };

                    match captured {
                        Some((req_bytes, skip_req, skip_resp)) => {
                            let req_body = dumped_body(&shared, &req_bytes, skip_req);

                            let body = std::mem::replace(response.body_mut(), Body::empty());
                            let (tapped, tap) = capture::install_response_tap(body);
                            *response.body_mut() = tapped;

                            // the record is only complete once the response
                            // has finished streaming to the client
                            tokio::spawn(async move {
                                let resp_bytes = tap.collected().await;
                                let resp_body = dumped_body(&shared, &resp_bytes, skip_resp);
                                emit_record(Some(req_body), Some(resp_body));
                            });
                        }
                        None => emit_record(None, None),
                    }

                    Ok(response)
                }
                Err(err) => {
                    guard.defuse();
                    record::emit_not_committed(&info, start.elapsed(), Some(err.to_string()));
                    Err(err)
                }
            }
        })
    }
}
