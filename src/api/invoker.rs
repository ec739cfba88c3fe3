//! In-process invokers.
//!
//! # Responsibilities
//! - Resolve the path template before any hook or loopback work
//! - Execute the endpoint by hook replay or through the loopback router
//! - Normalize both outcomes into an `ApiResponse`
//!
//! # Design Decisions
//! - The strategy is fixed when the invoker is built, never per call
//! - Each call builds its own request and response; invokers hold no per-call state
//! - No retries and no timeouts: a call completes, fails, or waits on its hooks

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::header::{HeaderValue, IntoHeaderName};
use axum::http::{HeaderMap, Request};
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::api::{ApiResponse, InvokeError};
use crate::config::Strategy;
use crate::http::request::{new_request_id, with_query};
use crate::http::{Loopback, Payload, Verb, VirtualRequest, VirtualResponse, X_REQUEST_ID};
use crate::lifecycle::{runner, Handler, Hooks};
use crate::observability::metrics;
use crate::routing::template::{render_value, Params, PathParams, PathTemplate};

/// Per-call request options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: Option<Payload>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(key.into(), value.to_string());
        self
    }

    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, payload: impl Into<Payload>) -> Self {
        self.body = Some(payload.into());
        self
    }
}

pub(crate) struct InvokerParts {
    pub name: String,
    pub verb: Verb,
    pub template: PathTemplate,
    pub hooks: Hooks,
    pub handler: Handler,
    pub strategy: Strategy,
    pub loopback: Loopback,
    pub body_limit: usize,
}

struct Target {
    name: String,
    verb: Verb,
    template: PathTemplate,
    hooks: Arc<Hooks>,
    handler: Handler,
    strategy: Strategy,
    loopback: Loopback,
    body_limit: usize,
}

/// Callable leaf of the invoker tree. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct Invoker {
    target: Arc<Target>,
}

impl Invoker {
    pub(crate) fn new(parts: InvokerParts) -> Self {
        Self {
            target: Arc::new(Target {
                name: parts.name,
                verb: parts.verb,
                template: parts.template,
                hooks: Arc::new(parts.hooks),
                handler: parts.handler,
                strategy: parts.strategy,
                loopback: parts.loopback,
                body_limit: parts.body_limit,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn verb(&self) -> Verb {
        self.target.verb
    }

    pub fn template(&self) -> &str {
        self.target.template.as_str()
    }

    pub fn strategy(&self) -> Strategy {
        self.target.strategy
    }

    /// Invoke with parameters only.
    pub async fn call(&self, params: impl Into<Params>) -> Result<ApiResponse, InvokeError> {
        self.call_with(params, CallOptions::default()).await
    }

    /// Invoke with parameters and request options.
    pub async fn call_with(
        &self,
        params: impl Into<Params>,
        options: CallOptions,
    ) -> Result<ApiResponse, InvokeError> {
        let target = &self.target;
        let params = params.into();
        let (path, rendered) = target.template.resolve(&params)?;
        let url = with_query(&path, &options.query);
        let request_id = new_request_id();

        let span = tracing::debug_span!(
            "invocation",
            name = %target.name,
            strategy = target.strategy.as_str(),
            request_id = %request_id,
        );
        let started = Instant::now();
        let outcome = match target.strategy {
            Strategy::HookReplay => {
                self.replay(&params, rendered, url, request_id, options)
                    .instrument(span)
                    .await
            }
            Strategy::Loopback => {
                self.loopback(url, request_id, options)
                    .instrument(span)
                    .await
            }
        };

        match &outcome {
            Ok(response) => {
                tracing::debug!(name = %target.name, status = response.status().as_u16(), "Invocation complete");
            }
            Err(e) => {
                tracing::warn!(name = %target.name, error = %e, "Invocation failed");
            }
        }
        metrics::record_invocation(
            &target.name,
            target.strategy.as_str(),
            outcome.as_ref().ok().map(|r| r.status().as_u16()),
            started,
        );
        outcome
    }

    async fn replay(
        &self,
        params: &Params,
        rendered: PathParams,
        url: String,
        request_id: String,
        options: CallOptions,
    ) -> Result<ApiResponse, InvokeError> {
        let target = &self.target;

        // Caller params the template does not consume still reach the handler.
        let mut handler_params = rendered;
        for (key, value) in params.iter() {
            if !handler_params.contains_key(key) {
                if let Some(value) = render_value(value) {
                    handler_params.insert(key.clone(), value);
                }
            }
        }

        let (headers, body) = request_body(options.headers, options.body, &request_id);
        let request = VirtualRequest {
            request_id,
            method: target.verb.method(),
            url,
            params: handler_params.clone(),
            query: options.query,
            headers,
            body,
        };

        let (tx, rx) = oneshot::channel();
        let reply = VirtualResponse::buffered(request.clone(), target.hooks.clone(), tx);
        runner::drive(&target.hooks, &target.handler, handler_params, request, reply)
            .await
            .map_err(InvokeError::Handler)?;

        rx.await.map_err(|_| InvokeError::NoResponse)
    }

    async fn loopback(
        &self,
        url: String,
        request_id: String,
        options: CallOptions,
    ) -> Result<ApiResponse, InvokeError> {
        let target = &self.target;
        let (headers, body) = request_body(options.headers, options.body, &request_id);

        let mut request = Request::builder()
            .method(target.verb.method())
            .uri(url)
            .body(Body::from(body))?;
        *request.headers_mut() = headers;

        let response = target.loopback.simulate(request).await?;
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, target.body_limit)
            .await
            .map_err(InvokeError::Body)?;
        Ok(ApiResponse::new(parts.status, parts.headers, body))
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("name", &self.target.name)
            .field("verb", &self.target.verb)
            .field("template", &self.target.template.as_str())
            .field("strategy", &self.target.strategy)
            .finish()
    }
}

/// Request headers and body for a call: request ID and content type are
/// filled in when the caller did not set them.
fn request_body(mut headers: HeaderMap, body: Option<Payload>, request_id: &str) -> (HeaderMap, Bytes) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.entry(X_REQUEST_ID).or_insert(value);
    }
    match body {
        Some(payload) => payload.finalize(headers),
        None => (headers, Bytes::new()),
    }
}
