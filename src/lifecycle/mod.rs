//! Request lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Invocation (wire request or in-process call):
//!     → on_request hooks     (stop early once the response is hijacked)
//!     → pre_handler hooks    (same)
//!     → handler              (skipped when hijacked)
//!     → send(payload)
//!         → on_send hooks    (pipeline: each output feeds the next)
//!         → response finalized
//!         → on_response hooks (side effects only)
//! ```
//!
//! # Design Decisions
//! - Stages are a closed enum; hooks per stage keep registration order
//! - Hijack is a property of the response, checked before every hook and the handler
//! - Hooks and handlers fail with `BoxError`; nothing here retries

pub mod handler;
pub mod hooks;
pub mod runner;

pub use handler::Handler;
pub use hooks::{HookStage, Hooks};

/// Error type returned by handlers and hooks.
pub type BoxError = tower::BoxError;
