//! In-process api subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Api::install(server, config)      → route listener on the host server
//!     ApiBuilder::define / get / post…  → HostServer::route (expose_as = dotted name)
//!         → listener: Invoker + RouteMeta inserted at the same tree path
//!     ApiBuilder::finish                → frozen Api, decorated on the server
//!
//! Invocation:
//!     api.client().get("nested.method") → Invoker::call(params, options)
//!         → template resolved (ParameterMismatch before any work)
//!         → hook replay | loopback
//!         → ApiResponse
//! ```
//!
//! # Design Decisions
//! - Client and metadata trees are built together and frozen together, so
//!   they cannot drift apart
//! - The builder is an explicit value owned by the integrator; nothing global
//! - Startup errors abort registration, invocation errors stay local to the call

pub mod builder;
pub mod invoker;
pub mod result;

use std::sync::Arc;

use thiserror::Error;

use crate::config::ApiConfig;
use crate::http::{HostServer, LoopbackError, ServerError};
use crate::lifecycle::BoxError;
use crate::routing::template::TemplateError;
use crate::routing::{RouteMeta, Tree};

pub use builder::ApiBuilder;
pub use invoker::{CallOptions, Invoker};
pub use result::ApiResponse;

/// Tree of callable invokers.
pub type InvokerTree = Tree<Invoker>;

/// Tree of `(verb, template)` pairs, congruent with the invoker tree.
pub type MetadataTree = Tree<RouteMeta>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("name '{path}' is already taken")]
    NameCollision { path: String },

    #[error("invalid exposed name '{0}'")]
    InvalidName(String),

    #[error("endpoint {template} has no name: give it an explicit name or a named handler")]
    MissingName { template: String },

    #[error("api is sealed; '{name}' can no longer be exposed")]
    Sealed { name: String },

    #[error(transparent)]
    Registration(#[from] ServerError),
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("parameters do not fit the route: {0}")]
    ParameterMismatch(#[from] TemplateError),

    #[error("handler failed: {0}")]
    Handler(BoxError),

    #[error("handler completed without sending a response")]
    NoResponse,

    #[error(transparent)]
    HostNotReady(#[from] LoopbackError),

    #[error("failed to build loopback request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("failed to read loopback response body: {0}")]
    Body(axum::Error),
}

/// The finished api: invoker tree plus metadata tree. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Api {
    client: Arc<InvokerTree>,
    meta: Arc<MetadataTree>,
}

impl Api {
    /// Install the api on `server`; see [`ApiBuilder::install`].
    pub fn install(server: &mut HostServer, config: ApiConfig) -> ApiBuilder {
        ApiBuilder::install(server, config)
    }

    pub(crate) fn new(client: InvokerTree, meta: MetadataTree) -> Self {
        Self {
            client: Arc::new(client),
            meta: Arc::new(meta),
        }
    }

    pub fn client(&self) -> &InvokerTree {
        &self.client
    }

    pub fn meta(&self) -> &MetadataTree {
        &self.meta
    }

    /// Invoker at a dotted path.
    pub fn invoker(&self, dotted: &str) -> Option<&Invoker> {
        self.client.get(dotted)
    }
}
