//! Reverse proxy for the API prefix.
//!
//! Ordinary calls are buffered: the upstream body is read in full under the
//! request timeout and returned with an exact `Content-Length`. Event streams
//! are relayed chunk by chunk as the upstream produces them, with no timeout,
//! until either side closes or the server shuts down.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use url::{Host, Url};

use crate::config::ProxyConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;

const REQUEST_DROPPED_HEADERS: [HeaderName; 4] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::ACCEPT_ENCODING,
];

const RESPONSE_DROPPED_HEADERS: [HeaderName; 3] = [
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::CONTENT_LENGTH,
];

pub struct StreamingProxy {
    client: reqwest::Client,
    path_prefix: String,
    origin: Url,
    authority: String,
    streaming_suffix: String,
    timeout: Duration,
    chunk_size: usize,
    max_request_body: usize,
    shutdown: CancellationToken,
}

impl StreamingProxy {
    /// Build a proxy for `config.origin`. Open streams end when `shutdown`
    /// is cancelled.
    pub fn new(config: &ProxyConfig, shutdown: CancellationToken) -> ServerResult<Self> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| ServerError::Config(format!("invalid proxy origin {}: {e}", config.origin)))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(ServerError::Config(format!(
                "proxy origin must be http or https: {}",
                config.origin
            )));
        }
        let host = origin
            .host_str()
            .ok_or_else(|| ServerError::Config(format!("proxy origin has no host: {}", config.origin)))?;
        let authority = match origin.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let timeout = Duration::from_secs(config.timeout_secs);
        let mut builder = reqwest::Client::builder()
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy();
        if trusts_self_signed(&origin) {
            // Local backends present the same self-signed certificate we do.
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| ServerError::Config(format!("proxy client: {e}")))?;

        Ok(Self {
            client,
            path_prefix: config.path_prefix.clone(),
            origin,
            authority,
            streaming_suffix: config.streaming_suffix.clone(),
            timeout,
            chunk_size: config.chunk_size.max(1),
            max_request_body: config.max_request_body,
            shutdown,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn upstream_url(&self, uri: &Uri) -> Url {
        let mut url = self.origin.clone();
        url.set_path(uri.path());
        url.set_query(uri.query());
        url
    }

    fn forward_headers(&self, incoming: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(incoming.len() + 2);
        for (name, value) in incoming {
            if !REQUEST_DROPPED_HEADERS.contains(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        if let Ok(host) = HeaderValue::from_str(&self.authority) {
            headers.insert(header::HOST, host);
        }
        headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static("https"),
        );
        headers
    }
}

#[async_trait]
impl RequestHandler for StreamingProxy {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.uri().path().starts_with(&self.path_prefix)
    }

    async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();
        let stream_requested = path.ends_with(&self.streaming_suffix);

        let body = match axum::body::to_bytes(body, self.max_request_body).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(%path, error = %e, "request body rejected");
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };

        let outgoing = self
            .client
            .request(parts.method.clone(), self.upstream_url(&parts.uri))
            .headers(self.forward_headers(&parts.headers))
            .body(body);

        // One deadline covers both the response head and the buffered body.
        let deadline = tokio::time::Instant::now() + self.timeout;
        let sent = if stream_requested {
            outgoing.send().await
        } else {
            match tokio::time::timeout_at(deadline, outgoing.send()).await {
                Ok(sent) => sent,
                Err(_) => return gateway_timeout(&path),
            }
        };
        let upstream = match sent {
            Ok(upstream) => upstream,
            Err(e) => return bad_gateway(&path, &e),
        };

        let status = upstream.status();
        let mut headers = HeaderMap::with_capacity(upstream.headers().len() + 2);
        for (name, value) in upstream.headers() {
            if !RESPONSE_DROPPED_HEADERS.contains(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        if stream_requested || is_event_stream(&headers) {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            );
            tracing::debug!(%path, %status, "relaying stream");
            let relay = relay_stream(upstream.bytes_stream(), self.chunk_size, self.shutdown.clone());
            return assemble(status, headers, Body::from_stream(relay));
        }

        let payload = match tokio::time::timeout_at(deadline, upstream.bytes()).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => return bad_gateway(&path, &e),
            Err(_) => return gateway_timeout(&path),
        };
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(payload.len()));
        assemble(status, headers, Body::from(payload))
    }
}

/// Re-chunk an upstream byte stream into pieces of at most `chunk_size`.
///
/// Ends at the first upstream error or when `shutdown` fires.
pub fn relay_stream<S, E>(
    upstream: S,
    chunk_size: usize,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    upstream
        .take_while(|item| {
            if let Err(e) = item {
                tracing::debug!(error = %e, "upstream stream ended with error");
            }
            futures::future::ready(item.is_ok())
        })
        .filter_map(|item| futures::future::ready(item.ok()))
        .flat_map(move |bytes| stream::iter(split_bytes(bytes, chunk_size)))
        .map(Ok::<Bytes, std::io::Error>)
        .take_until(shutdown.cancelled_owned())
}

fn split_bytes(bytes: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut pieces = Vec::with_capacity(bytes.len() / chunk_size + 1);
    let mut start = 0;
    while start < bytes.len() {
        let end = (start + chunk_size).min(bytes.len());
        pieces.push(bytes.slice(start..end));
        start = end;
    }
    pieces
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
}

/// Whether certificate checks are skipped for `origin`: only https origins
/// on a loopback host qualify.
fn trusts_self_signed(origin: &Url) -> bool {
    origin.scheme() == "https" && is_loopback(origin)
}

/// True for `localhost` and loopback IP literals.
pub fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

fn assemble(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn bad_gateway(path: &str, error: &reqwest::Error) -> Response {
    tracing::warn!(%path, %error, "upstream request failed");
    (StatusCode::BAD_GATEWAY, format!("Bad gateway: {error}")).into_response()
}

fn gateway_timeout(path: &str) -> Response {
    tracing::warn!(%path, "upstream request timed out");
    (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout").into_response()
}
