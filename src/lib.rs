//! Dual-invocation routes for axum services.
//!
//! One route definition serves two callers: wire clients over HTTP and
//! in-process code through a tree of typed invokers. Both run the same
//! handler and the same lifecycle hooks, and both produce the same
//! structured result.

// Core subsystems
pub mod api;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod routing;

// Cross-cutting concerns
pub mod observability;

pub use api::{Api, ApiBuilder, ApiResponse, BuildError, CallOptions, InvokeError, Invoker};
pub use config::{ServiceConfig, Strategy};
pub use http::{HostServer, Payload, RouteOptions, Verb, VirtualRequest, VirtualResponse};
pub use lifecycle::{BoxError, Hooks};
pub use routing::{Endpoint, Params, PathParams, SpecTree, Verbs};
