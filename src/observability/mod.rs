//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Registration and invocation produce:
//!     → logging.rs (structured events, `invocation` and `endpoint` spans)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every span of an invocation
//! - Metric updates are cheap no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
