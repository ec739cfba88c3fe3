//! Type-erased endpoint handlers.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tracing::Instrument;

use crate::http::{VirtualRequest, VirtualResponse};
use crate::lifecycle::BoxError;
use crate::routing::template::PathParams;

type HandlerFn = dyn Fn(PathParams, VirtualRequest, VirtualResponse) -> BoxFuture<'static, Result<(), BoxError>>
    + Send
    + Sync;

/// Endpoint logic shared by the wire route and its in-process invoker.
#[derive(Clone)]
pub struct Handler {
    name: Option<String>,
    call: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap an async function or closure.
    ///
    /// A plain `fn` item keeps its own name as the handler identifier;
    /// closures are anonymous.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(PathParams, VirtualRequest, VirtualResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: identifier(type_name::<F>()),
            call: Arc::new(move |params, req, reply| handler(params, req, reply).boxed()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call(
        &self,
        params: PathParams,
        request: VirtualRequest,
        reply: VirtualResponse,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        (self.call)(params, request, reply)
    }

    /// Run every call inside an `endpoint` span carrying the exposed name.
    pub(crate) fn instrumented(&self, exposed: &str) -> Self {
        let inner = self.clone();
        let exposed = exposed.to_string();
        Self {
            name: self.name.clone(),
            call: Arc::new(move |params, req, reply| {
                let span = tracing::debug_span!(
                    "endpoint",
                    name = %exposed,
                    request_id = %req.request_id,
                );
                inner.call(params, req, reply).instrument(span).boxed()
            }),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

/// Last path segment of a fn item's type name; `None` for closures.
fn identifier(type_name: &str) -> Option<String> {
    if type_name.contains("{{closure}}") {
        return None;
    }
    let last = type_name.rsplit("::").next()?;
    let valid = !last.is_empty() && last.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| last.to_string())
}
