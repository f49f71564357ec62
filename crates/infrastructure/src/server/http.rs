//! DNS over HTTP(S) (RFC 8484).

use super::listener::StreamListener;
use super::{Server, ServerError};
use crate::pool;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Extension, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ferrous_gate_application::message::min_ttl;
use ferrous_gate_application::ports::DnsHandler;
use ferrous_gate_domain::RequestMeta;
use hickory_proto::op::Message;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use serde::Deserialize;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

pub const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// Largest DNS message a POST body may carry.
const MAX_BODY_SIZE: usize = 65535;

#[derive(Error, Debug)]
pub enum HttpHandlerError {
    #[error("invalid client ip header {0:?}")]
    InvalidHeader(String),
}

pub struct HttpHandlerOpts {
    pub dns_handler: Arc<dyn DnsHandler>,
    /// Request path to serve. Empty serves every path.
    pub path: String,
    /// Header holding the real client address. Empty disables it.
    pub src_ip_header: String,
}

#[derive(Clone)]
struct DohState {
    dns_handler: Arc<dyn DnsHandler>,
    src_ip_header: Option<HeaderName>,
}

/// Address of the peer (or PROXY-conveyed source) of the connection a request
/// arrived on.
#[derive(Clone, Copy, Debug)]
struct PeerAddr(Option<IpAddr>);

#[derive(Deserialize)]
struct DnsParam {
    dns: Option<String>,
}

/// Turns DoH requests into DNS queries for a [`DnsHandler`].
pub struct HttpHandler {
    router: Router,
}

impl HttpHandler {
    pub fn new(opts: HttpHandlerOpts) -> Result<Self, HttpHandlerError> {
        let src_ip_header = if opts.src_ip_header.is_empty() {
            None
        } else {
            Some(
                HeaderName::from_bytes(opts.src_ip_header.as_bytes())
                    .map_err(|_| HttpHandlerError::InvalidHeader(opts.src_ip_header.clone()))?,
            )
        };

        let state = DohState {
            dns_handler: opts.dns_handler,
            src_ip_header,
        };

        let doh: MethodRouter<DohState> = get(get_dns_query).post(post_dns_query);
        let router = if opts.path.is_empty() {
            Router::new().fallback(doh)
        } else if opts.path.starts_with('/') {
            Router::new().route(&opts.path, doh)
        } else {
            Router::new().route(&format!("/{}", opts.path), doh)
        };

        Ok(Self {
            router: router
                .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
                .with_state(state),
        })
    }

    /// Router for one connection whose client address is `peer`.
    pub fn router(&self, peer: Option<IpAddr>) -> Router {
        self.router.clone().layer(Extension(PeerAddr(peer)))
    }
}

impl DohState {
    fn client_ip(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
        let from_header = self.src_ip_header.as_ref().and_then(|name| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .and_then(|first| first.trim().parse::<IpAddr>().ok())
        });
        from_header.or(peer)
    }
}

async fn get_dns_query(
    State(state): State<DohState>,
    Extension(PeerAddr(peer)): Extension<PeerAddr>,
    headers: HeaderMap,
    Query(param): Query<DnsParam>,
) -> Response {
    let Some(encoded) = param.dns else {
        return (StatusCode::BAD_REQUEST, "missing dns parameter").into_response();
    };

    match URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')) {
        Ok(wire) => answer(&state, &headers, peer, &wire).await,
        Err(e) => {
            debug!(error = %e, "Invalid base64 dns parameter");
            (StatusCode::BAD_REQUEST, "invalid dns parameter").into_response()
        }
    }
}

async fn post_dns_query(
    State(state): State<DohState>,
    Extension(PeerAddr(peer)): Extension<PeerAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    if content_type != Some(DNS_MESSAGE_CONTENT_TYPE) {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }

    answer(&state, &headers, peer, &body).await
}

async fn answer(state: &DohState, headers: &HeaderMap, peer: Option<IpAddr>, wire: &[u8]) -> Response {
    let query = match Message::from_vec(wire) {
        Ok(query) => query,
        Err(e) => {
            debug!(error = %e, "Invalid msg in http request");
            return (StatusCode::BAD_REQUEST, "invalid dns message").into_response();
        }
    };

    let meta = RequestMeta::new(state.client_ip(headers, peer));

    let response = match state.dns_handler.serve_dns(&query, &meta).await {
        Ok(Some(response)) => response,
        Ok(None) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(e) => {
            warn!(error = %e, client = ?meta.client_addr, "Handler err");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let packed = match pool::pack_buffer(&response) {
        Ok(packed) => packed,
        Err(e) => {
            warn!(error = %e, "Failed to pack handler's response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut http_response = (
        [(CONTENT_TYPE, HeaderValue::from_static(DNS_MESSAGE_CONTENT_TYPE))],
        Bytes::copy_from_slice(&packed),
    )
        .into_response();

    if let Some(ttl) = min_ttl(&response) {
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={ttl}")) {
            http_response.headers_mut().insert(CACHE_CONTROL, value);
        }
    }
    http_response
}

impl Server {
    /// Serve DoH over plain HTTP.
    pub async fn serve_http(&self, listener: StreamListener) -> Result<(), ServerError> {
        let http = self.http_handler()?;
        let idle_timeout = self.idle_timeout();

        self.accept_loop(listener, move |conn, client| {
            serve_http_conn(conn, http.router(client), idle_timeout)
        })
        .await
    }

    /// Serve DoH over HTTPS.
    pub async fn serve_https(&self, listener: StreamListener) -> Result<(), ServerError> {
        let http = self.http_handler()?;
        let acceptor = TlsAcceptor::from(self.tls_config()?);
        let idle_timeout = self.idle_timeout();

        self.accept_loop(listener, move |conn, client| {
            let router = http.router(client);
            let acceptor = acceptor.clone();
            async move {
                match tokio::time::timeout(idle_timeout, acceptor.accept(conn)).await {
                    Ok(Ok(stream)) => serve_http_conn(stream, router, idle_timeout).await,
                    Ok(Err(e)) => debug!(error = %e, client = ?client, "TLS handshake failed"),
                    Err(_) => debug!(client = ?client, "TLS handshake timed out"),
                }
            }
        })
        .await
    }
}

async fn serve_http_conn<S>(stream: S, router: Router, idle_timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let activity = Activity::new();
    let io = TokioIo::new(TrackedIo {
        inner: stream,
        activity: activity.clone(),
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(idle_timeout);

    let conn = builder.serve_connection(io, TowerToHyperService::new(router));
    tokio::pin!(conn);

    // Set once the connection has been idle for `idle_timeout` and asked to
    // shut down; it is dropped if it has not drained by then.
    let mut drain_deadline: Option<Instant> = None;

    loop {
        let wake_at = drain_deadline.unwrap_or_else(|| activity.last() + idle_timeout);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(error = %e, "HTTP connection closed with error");
                }
                return;
            }
            _ = tokio::time::sleep_until(wake_at) => {
                if drain_deadline.is_some() {
                    debug!("HTTP connection did not drain after idle timeout, dropping");
                    return;
                }
                if activity.last() + idle_timeout <= Instant::now() {
                    debug!(idle_ms = idle_timeout.as_millis() as u64, "Closing idle HTTP connection");
                    conn.as_mut().graceful_shutdown();
                    drain_deadline = Some(Instant::now() + idle_timeout);
                }
            }
        }
    }
}

/// Time of the last read or write on one connection.
#[derive(Clone)]
struct Activity {
    origin: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// Stream wrapper recording traffic in an [`Activity`].
struct TrackedIo<S> {
    inner: S,
    activity: Activity,
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedIo<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.activity.touch();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedIo<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        poll
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use ferrous_gate_domain::DomainError;
    use hickory_proto::op::{MessageType, Query as DnsQuestion};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use http_body_util::BodyExt;
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use tower::ServiceExt;

    /// Answers every query with an A record holding the client address.
    struct EchoClient;

    #[async_trait]
    impl DnsHandler for EchoClient {
        async fn serve_dns(
            &self,
            query: &Message,
            meta: &RequestMeta,
        ) -> Result<Option<Message>, DomainError> {
            let ip = match meta.client_addr {
                Some(IpAddr::V4(ip)) => ip,
                _ => Ipv4Addr::UNSPECIFIED,
            };
            let mut response = Message::new();
            response
                .set_id(query.id())
                .set_message_type(MessageType::Response)
                .add_queries(query.queries().to_vec())
                .add_answer(Record::from_rdata(
                    query.queries()[0].name().clone(),
                    120,
                    RData::A(A(ip)),
                ));
            Ok(Some(response))
        }
    }

    fn handler(path: &str, header: &str) -> HttpHandler {
        HttpHandler::new(HttpHandlerOpts {
            dns_handler: Arc::new(EchoClient),
            path: path.to_string(),
            src_ip_header: header.to_string(),
        })
        .unwrap()
    }

    fn wire_query() -> Vec<u8> {
        let mut msg = Message::new();
        msg.set_id(0)
            .set_message_type(MessageType::Query)
            .add_query(DnsQuestion::query(
                Name::from_str("example.com.").unwrap(),
                RecordType::A,
            ));
        msg.to_vec().unwrap()
    }

    async fn body_message(response: Response) -> Message {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        Message::from_vec(&body).unwrap()
    }

    fn answer_ip(msg: &Message) -> Ipv4Addr {
        match msg.answers()[0].data() {
            RData::A(A(ip)) => *ip,
            other => panic!("unexpected rdata {other:?}"),
        }
    }

    fn peer() -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)))
    }

    #[tokio::test]
    async fn test_get_query() {
        let uri = format!("/dns-query?dns={}", URL_SAFE_NO_PAD.encode(wire_query()));
        let response = handler("/dns-query", "")
            .router(peer())
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            DNS_MESSAGE_CONTENT_TYPE
        );
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "max-age=120");
        let msg = body_message(response).await;
        assert_eq!(answer_ip(&msg), Ipv4Addr::new(192, 0, 2, 10));
    }

    #[tokio::test]
    async fn test_post_query() {
        let response = handler("/dns-query", "")
            .router(peer())
            .oneshot(
                Request::post("/dns-query")
                    .header(CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
                    .body(Body::from(wire_query()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let msg = body_message(response).await;
        assert_eq!(msg.answers().len(), 1);
    }

    #[tokio::test]
    async fn test_post_wrong_content_type() {
        let response = handler("/dns-query", "")
            .router(peer())
            .oneshot(
                Request::post("/dns-query")
                    .header(CONTENT_TYPE, "text/plain")
                    .body(Body::from(wire_query()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_other_path_is_not_found() {
        let response = handler("/dns-query", "")
            .router(peer())
            .oneshot(Request::get("/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_path_serves_any_path() {
        let uri = format!("/anything?dns={}", URL_SAFE_NO_PAD.encode(wire_query()));
        let response = handler("", "")
            .router(peer())
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_other_method_not_allowed() {
        let response = handler("/dns-query", "")
            .router(peer())
            .oneshot(Request::put("/dns-query").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_bad_payloads() {
        let router = handler("/dns-query", "").router(peer());

        let missing = router
            .clone()
            .oneshot(Request::get("/dns-query").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let not_base64 = router
            .clone()
            .oneshot(Request::get("/dns-query?dns=%%%").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(not_base64.status(), StatusCode::BAD_REQUEST);

        let uri = format!("/dns-query?dns={}", URL_SAFE_NO_PAD.encode([1u8, 2, 3]));
        let not_dns = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(not_dns.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_client_ip_from_header() {
        let uri = format!("/dns-query?dns={}", URL_SAFE_NO_PAD.encode(wire_query()));
        let response = handler("/dns-query", "X-Forwarded-For")
            .router(peer())
            .oneshot(
                Request::get(uri)
                    .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let msg = body_message(response).await;
        assert_eq!(answer_ip(&msg), Ipv4Addr::new(203, 0, 113, 5));
    }

    #[tokio::test]
    async fn test_unparsable_header_falls_back_to_peer() {
        let uri = format!("/dns-query?dns={}", URL_SAFE_NO_PAD.encode(wire_query()));
        let response = handler("/dns-query", "X-Real-IP")
            .router(peer())
            .oneshot(
                Request::get(uri)
                    .header("x-real-ip", "unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let msg = body_message(response).await;
        assert_eq!(answer_ip(&msg), Ipv4Addr::new(192, 0, 2, 10));
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let result = HttpHandler::new(HttpHandlerOpts {
            dns_handler: Arc::new(EchoClient),
            path: String::new(),
            src_ip_header: "bad header".to_string(),
        });
        assert!(matches!(result, Err(HttpHandlerError::InvalidHeader(_))));
    }
}
