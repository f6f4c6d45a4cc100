//! Log record assembly and emission.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request};
use axum::http::{header, HeaderMap, Method, Uri};
use tracing::warn;

/// Conventional request correlation header, stamped by reverse proxies or
/// an id-generating middleware upstream of this one.
pub(crate) const X_REQUEST_ID: &str = "x-request-id";

/// Text rendered in place of a redacted body.
pub(crate) const EXCLUDED_BODY: &str = "[excluded]";

/// Fields known before the downstream service has produced anything.
#[derive(Debug, Clone)]
pub(crate) struct RequestInfo {
    pub(crate) request_id: String,
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) host: String,
    pub(crate) remote_ip: String,
}

/// Everything that goes into one emitted log line.
#[derive(Debug)]
pub(crate) struct LogRecord {
    pub(crate) status: u16,
    pub(crate) latency: Duration,
    pub(crate) request_id: String,
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) host: String,
    pub(crate) remote_ip: String,
    pub(crate) req_headers: Option<HeaderMap>,
    pub(crate) resp_headers: Option<HeaderMap>,
    pub(crate) req_body: Option<String>,
    pub(crate) resp_body: Option<String>,
}

impl LogRecord {
    /// Emits the record at the severity implied by the status code: 5xx as
    /// an error, 4xx as a warning, everything else as info. Header and
    /// body fields are only present when they were dumped.
    pub(crate) fn emit(self) {
        let LogRecord {
            status,
            latency,
            request_id,
            method,
            uri,
            host,
            remote_ip,
            req_headers,
            resp_headers,
            req_body,
            resp_body,
        } = self;
        let message = status_message(status);

        macro_rules! log_at {
            ($level:ident) => {
                tracing::$level!(
                    status,
                    latency = ?latency,
                    request_id = %request_id,
                    method = %method,
                    uri = %uri,
                    host = %host,
                    remote_ip = %remote_ip,
                    req.headers = req_headers.as_ref().map(tracing::field::debug),
                    resp.headers = resp_headers.as_ref().map(tracing::field::debug),
                    req.body = req_body.as_deref(),
                    resp.body = resp_body.as_deref(),
                    "{}", message
                )
            };
        }

        match status {
            500.. => log_at!(error),
            400..=499 => log_at!(warn),
            _ => log_at!(info),
        }
    }
}

/// Warning for requests that never produced a response: the downstream
/// service returned an error, or the in-flight future was dropped because
/// the client went away.
pub(crate) fn emit_not_committed(info: &RequestInfo, latency: Duration, error: Option<String>) {
    warn!(
        latency = ?latency,
        request_id = %info.request_id,
        method = %info.method,
        uri = %info.uri,
        host = %info.host,
        remote_ip = %info.remote_ip,
        error = error.as_deref(),
        "Response not committed"
    );
}

/// Message text for a status code, by response class.
pub(crate) fn status_message(status: u16) -> &'static str {
    match status {
        500.. => "Server error",
        400..=499 => "Client error",
        300..=399 => "Redirection",
        _ => "Success",
    }
}

/// Request id carried in `headers`, if any.
pub(crate) fn request_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Host the client addressed: the URI authority when the request line was
/// absolute, otherwise the `Host` header.
pub(crate) fn host_of(uri: &Uri, headers: &HeaderMap) -> String {
    if let Some(host) = uri.host() {
        return host.to_owned();
    }
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

/// Best-effort client address: proxy headers first, then the socket peer
/// recorded by the server, then empty.
pub(crate) fn real_ip(request: &Request) -> String {
    let headers = request.headers();

    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_owned();
            }
        }
    }

    if let Some(real) = headers.get("x-real-ip").and_then(|value| value.to_str().ok()) {
        return real.to_owned();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    #[test]
    fn message_follows_status_class() {
        assert_eq!(status_message(101), "Success");
        assert_eq!(status_message(200), "Success");
        assert_eq!(status_message(201), "Success");
        assert_eq!(status_message(302), "Redirection");
        assert_eq!(status_message(400), "Client error");
        assert_eq!(status_message(404), "Client error");
        assert_eq!(status_message(500), "Server error");
        assert_eq!(status_message(503), "Server error");
    }

    #[test]
    fn request_id_read_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id_from(&headers), None);

        headers.insert(X_REQUEST_ID, HeaderValue::from_static("req-id-123"));
        assert_eq!(request_id_from(&headers).as_deref(), Some("req-id-123"));
    }

    #[test]
    fn host_prefers_uri_authority() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com"));

        let relative: Uri = "/ping".parse().unwrap();
        assert_eq!(host_of(&relative, &headers), "example.com");

        let absolute: Uri = "http://svc.internal/ping".parse().unwrap();
        assert_eq!(host_of(&absolute, &headers), "svc.internal");
    }

    #[test]
    fn host_empty_when_nothing_known() {
        let relative: Uri = "/ping".parse().unwrap();
        assert_eq!(host_of(&relative, &HeaderMap::new()), "");
    }

    #[test]
    fn real_ip_prefers_forwarded_chain_head() {
        let request = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "10.0.0.1, 172.16.0.9")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(real_ip(&request), "10.0.0.1");
    }

    #[test]
    fn real_ip_falls_back_to_real_ip_header() {
        let request = Request::builder()
            .uri("/")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(real_ip(&request), "192.168.1.1");
    }

    #[test]
    fn real_ip_uses_peer_address_last() {
        let mut request = Request::new(Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 8080))));
        assert_eq!(real_ip(&request), "127.0.0.1");

        let bare = Request::new(Body::empty());
        assert_eq!(real_ip(&bare), "");
    }
}
