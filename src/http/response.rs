//! Virtual responses.
//!
//! # Responsibilities
//! - Offer `header`, `code` and `send` to hooks and handlers on either path
//! - Delegate to the live wire response when one exists
//! - Otherwise buffer status and headers, run `on_send`/`on_response` hooks and
//!   resolve the pending invocation
//!
//! # Design Decisions
//! - Transport is fixed at construction: `Live` or `Buffered`
//! - The first `send` hijacks the response; a second `send` is rejected
//! - `on_send`/`on_response` only run for a response the handler sent; a
//!   hook that hijacks before the handler gets its payload through unchanged
//! - Status and headers are read after `on_send`, on both transports
//! - Locks are never held across an await

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::{Body, Bytes};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::api::ApiResponse;
use crate::http::VirtualRequest;
use crate::lifecycle::{runner, BoxError, Hooks};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("response already sent")]
    AlreadySent,

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("on_send hook failed: {0}")]
    Hook(BoxError),
}

/// A response body as a handler produces it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Json(Value),
    Bytes(Bytes),
}

impl Payload {
    /// Serialize any value into a JSON payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Payload::Json)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Payload::Empty => None,
            Payload::Text(_) => Some(TEXT_PLAIN),
            Payload::Json(_) => Some(APPLICATION_JSON),
            Payload::Bytes(_) => Some(OCTET_STREAM),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Empty => Bytes::new(),
            Payload::Text(text) => Bytes::from(text),
            Payload::Json(value) => Bytes::from(value.to_string()),
            Payload::Bytes(bytes) => bytes,
        }
    }

    /// Wire form: headers gain the payload's content type unless one is set.
    pub fn finalize(self, mut headers: HeaderMap) -> (HeaderMap, Bytes) {
        if let Some(content_type) = self.content_type() {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(content_type));
        }
        (headers, self.into_bytes())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

/// What a live response hands back to the host once sent. Status and
/// headers stay on `reply` until the host's post-send hooks are done.
#[derive(Debug)]
pub struct SentResponse {
    pub payload: Payload,
    pub reply: VirtualResponse,
}

impl SentResponse {
    /// Build the wire response around an already transformed payload.
    pub fn into_response(status: StatusCode, headers: HeaderMap, payload: Payload) -> Response {
        let (headers, body) = payload.finalize(headers);
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Backing response of a request that arrived over a real connection.
#[derive(Debug)]
pub struct LiveConnection {
    status: StatusCode,
    headers: HeaderMap,
    pending: Option<oneshot::Sender<SentResponse>>,
}

impl LiveConnection {
    pub fn new(pending: oneshot::Sender<SentResponse>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            pending: Some(pending),
        }
    }
}

#[derive(Debug)]
struct Buffered {
    status: Option<StatusCode>,
    headers: HeaderMap,
    pending: Option<oneshot::Sender<ApiResponse>>,
}

#[derive(Debug)]
enum Transport {
    Live(LiveConnection),
    Buffered(Buffered),
}

#[derive(Debug)]
struct Inner {
    request: VirtualRequest,
    hooks: Arc<Hooks>,
    hijacked: AtomicBool,
    in_handler: AtomicBool,
    transport: Mutex<Transport>,
}

/// Response handle given to hooks and handlers. Clones share state.
#[derive(Debug, Clone)]
pub struct VirtualResponse {
    inner: Arc<Inner>,
}

impl VirtualResponse {
    /// A response delegating to a live connection. The host runs its own
    /// post-send hooks on what arrives through the connection.
    pub fn live(request: VirtualRequest, connection: LiveConnection) -> Self {
        Self::with_transport(request, Arc::new(Hooks::default()), Transport::Live(connection))
    }

    /// A response for an in-process invocation. `hooks` supplies the
    /// `on_send`/`on_response` stages; `pending` receives the result.
    pub fn buffered(
        request: VirtualRequest,
        hooks: Arc<Hooks>,
        pending: oneshot::Sender<ApiResponse>,
    ) -> Self {
        let transport = Transport::Buffered(Buffered {
            status: None,
            headers: HeaderMap::new(),
            pending: Some(pending),
        });
        Self::with_transport(request, hooks, transport)
    }

    fn with_transport(request: VirtualRequest, hooks: Arc<Hooks>, transport: Transport) -> Self {
        Self {
            inner: Arc::new(Inner {
                request,
                hooks,
                hijacked: AtomicBool::new(false),
                in_handler: AtomicBool::new(false),
                transport: Mutex::new(transport),
            }),
        }
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        self.inner.transport.lock().expect("response mutex poisoned")
    }

    pub fn is_live(&self) -> bool {
        matches!(*self.transport(), Transport::Live(_))
    }

    /// True once anything has been sent.
    pub fn hijacked(&self) -> bool {
        self.inner.hijacked.load(Ordering::SeqCst)
    }

    /// Mark that hooks are done and the handler owns the response.
    pub(crate) fn enter_handler(&self) {
        self.inner.in_handler.store(true, Ordering::SeqCst);
    }

    /// True once the handler has been entered. A response sent before that
    /// was hijacked by a hook and skips the post-send stages.
    pub fn reached_handler(&self) -> bool {
        self.inner.in_handler.load(Ordering::SeqCst)
    }

    pub fn header(&self, name: &str, value: &str) -> Result<(), ReplyError> {
        let name = HeaderName::try_from(name).map_err(|_| ReplyError::InvalidHeader(name.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| ReplyError::InvalidHeader(name.as_str().to_string()))?;
        match &mut *self.transport() {
            Transport::Live(conn) => conn.headers.insert(name, value),
            Transport::Buffered(buf) => buf.headers.insert(name, value),
        };
        Ok(())
    }

    pub fn code(&self, status: StatusCode) {
        match &mut *self.transport() {
            Transport::Live(conn) => conn.status = status,
            Transport::Buffered(buf) => buf.status = Some(status),
        }
    }

    /// Current status, `200` until `code` is called.
    pub fn status(&self) -> StatusCode {
        match &*self.transport() {
            Transport::Live(conn) => conn.status,
            Transport::Buffered(buf) => buf.status.unwrap_or(StatusCode::OK),
        }
    }

    pub fn header_value(&self, name: &str) -> Option<String> {
        let transport = self.transport();
        let headers = match &*transport {
            Transport::Live(conn) => &conn.headers,
            Transport::Buffered(buf) => &buf.headers,
        };
        headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
    }

    /// Take the headers set so far, leaving none behind.
    pub fn take_headers(&self) -> HeaderMap {
        match &mut *self.transport() {
            Transport::Live(conn) => std::mem::take(&mut conn.headers),
            Transport::Buffered(buf) => std::mem::take(&mut buf.headers),
        }
    }

    /// Send the response. Allowed once per invocation.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        if self.inner.hijacked.swap(true, Ordering::SeqCst) {
            return Err(ReplyError::AlreadySent);
        }
        let payload = payload.into();

        let live = match &mut *self.transport() {
            Transport::Live(conn) => Some(conn.pending.take()),
            Transport::Buffered(_) => None,
        };
        if let Some(pending) = live {
            if let Some(tx) = pending {
                let sent = SentResponse {
                    payload,
                    reply: self.clone(),
                };
                if tx.send(sent).is_err() {
                    tracing::debug!(url = %self.inner.request.url, "Connection gone before response was sent");
                }
            }
            return Ok(());
        }

        let request = &self.inner.request;
        let post_send = self.reached_handler();
        let payload = if post_send {
            runner::apply_on_send(&self.inner.hooks, request, self, payload)
                .await
                .map_err(ReplyError::Hook)?
        } else {
            payload
        };

        let resolved = {
            let mut transport = self.transport();
            if let Transport::Buffered(buf) = &mut *transport {
                let status = buf.status.unwrap_or(StatusCode::OK);
                let response = ApiResponse::from_payload(status, buf.headers.clone(), payload);
                buf.pending.take().map(|tx| (tx, response))
            } else {
                None
            }
        };
        if let Some((tx, response)) = resolved {
            if tx.send(response).is_err() {
                tracing::debug!(url = %request.url, "Invocation dropped before response was sent");
            }
        }

        if post_send {
            runner::apply_on_response(&self.inner.hooks, request, self).await;
        }
        Ok(())
    }
}

/// Turn a handler or hook failure into the wire's server error.
pub fn internal_error(error: &BoxError) -> Response {
    tracing::error!(error = %error, "Endpoint failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use serde_json::json;

    fn request() -> VirtualRequest {
        VirtualRequest::new(Method::GET, "/x")
    }

    #[tokio::test]
    async fn test_buffered_send_resolves_pending() {
        let (tx, rx) = oneshot::channel();
        let reply = VirtualResponse::buffered(request(), Arc::new(Hooks::new()), tx);
        reply.code(StatusCode::CREATED);
        reply.header("x-trace", "abc").unwrap();
        reply.send(json!({"id": "1"})).await.unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-trace"], "abc");
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON);
        assert_eq!(response.json(), Some(&json!({"id": "1"})));
        assert!(reply.hijacked());
    }

    #[tokio::test]
    async fn test_second_send_is_rejected() {
        let (tx, _rx) = oneshot::channel();
        let reply = VirtualResponse::buffered(request(), Arc::new(Hooks::new()), tx);
        reply.send("first").await.unwrap();
        assert!(matches!(reply.send("second").await, Err(ReplyError::AlreadySent)));
    }

    #[tokio::test]
    async fn test_live_send_delegates_to_connection() {
        let (tx, rx) = oneshot::channel();
        let reply = VirtualResponse::live(request(), LiveConnection::new(tx));
        assert!(reply.is_live());
        reply.code(StatusCode::ACCEPTED);
        reply.header("x-on-request", "true").unwrap();
        reply.send("queued").await.unwrap();

        let sent = rx.await.unwrap();
        assert_eq!(sent.payload, Payload::Text("queued".into()));
        // Still writable until the host finalizes the wire response.
        sent.reply.code(StatusCode::CREATED);
        assert_eq!(sent.reply.status(), StatusCode::CREATED);
        assert_eq!(sent.reply.take_headers()["x-on-request"], "true");
        assert!(sent.reply.take_headers().is_empty());
    }

    #[tokio::test]
    async fn test_send_before_handler_skips_post_send_hooks() {
        let responded = Arc::new(AtomicBool::new(false));
        let flag = responded.clone();
        let hooks = Hooks::new()
            .on_send(|_, reply: VirtualResponse, payload: Payload| async move {
                reply.code(StatusCode::ACCEPTED);
                Ok(Payload::Text(format!("wrapped({})", payload.as_text().unwrap_or_default())))
            })
            .on_response(move |_, _| {
                flag.store(true, Ordering::SeqCst);
                async { Ok(()) }
            });

        let (tx, rx) = oneshot::channel();
        let reply = VirtualResponse::buffered(request(), Arc::new(hooks.clone()), tx);
        reply.code(StatusCode::FORBIDDEN);
        reply.send("denied").await.unwrap();
        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.text(), Some("denied"));
        assert!(!responded.load(Ordering::SeqCst));

        let (tx, rx) = oneshot::channel();
        let reply = VirtualResponse::buffered(request(), Arc::new(hooks), tx);
        reply.enter_handler();
        reply.send("body").await.unwrap();
        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.text(), Some("wrapped(body)"));
        assert!(responded.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let (tx, _rx) = oneshot::channel();
        let reply = VirtualResponse::buffered(request(), Arc::new(Hooks::new()), tx);
        assert!(matches!(
            reply.header("bad header", "x"),
            Err(ReplyError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_payload_content_type_respects_handler_choice() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        let (headers, body) = Payload::from("<p>hi</p>").finalize(headers);
        assert_eq!(headers[CONTENT_TYPE], "text/html");
        assert_eq!(&body[..], b"<p>hi</p>");

        let (headers, body) = Payload::Empty.finalize(HeaderMap::new());
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert!(body.is_empty());
    }
}
