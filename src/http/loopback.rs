//! In-process request simulation.
//!
//! A `Loopback` pushes a synthetic request through the sealed host router
//! with `tower::ServiceExt::oneshot`: every layer, hook and handler runs as for
//! a wire client, without a socket.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use thiserror::Error;
use tower::ServiceExt;

#[derive(Debug, Error)]
pub enum LoopbackError {
    #[error("host server is not sealed yet; loopback requests need the final router")]
    NotReady,
}

/// Handle to the host router once it has been sealed. Cheap to clone.
#[derive(Clone, Default)]
pub struct Loopback {
    router: Arc<ArcSwapOption<Router>>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, router: Router) {
        self.router.store(Some(Arc::new(router)));
    }

    pub fn is_ready(&self) -> bool {
        self.router.load().is_some()
    }

    pub async fn simulate(&self, request: Request<Body>) -> Result<Response<Body>, LoopbackError> {
        let router = self.router.load_full().ok_or(LoopbackError::NotReady)?;
        tracing::trace!(method = %request.method(), uri = %request.uri(), "Loopback request");
        match Router::clone(&router).oneshot(request).await {
            Ok(response) => Ok(response),
            Err(infallible) => match infallible {},
        }
    }
}

impl std::fmt::Debug for Loopback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loopback")
            .field("ready", &self.is_ready())
            .finish()
    }
}
