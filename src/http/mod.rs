//! Host server subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (startup):
//!     HostServer::route(verb, template, options, handler)
//!     → route listeners (may replace the handler or reject the route)
//!     → wire endpoint installed on the axum Router
//!
//! Wire request:
//!     TCP connection → axum → wire endpoint
//!     → request.rs (VirtualRequest)
//!     → response.rs (VirtualResponse, live transport)
//!     → lifecycle hooks + handler → post-send hooks → Response
//!
//! Loopback request:
//!     loopback.rs → sealed Router (oneshot) → same wire endpoint
//! ```

pub mod loopback;
pub mod request;
pub mod response;
pub mod server;

pub use loopback::{Loopback, LoopbackError};
pub use request::{VirtualRequest, X_REQUEST_ID};
pub use response::{LiveConnection, Payload, ReplyError, SentResponse, VirtualResponse};
pub use server::{HostServer, RouteOptions, RouteRegistration, ServerError, Verb};
