//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Declaration (at startup):
//!     SpecTree (Endpoint | Namespace | List)
//!     → spec.rs (endpoint definitions, naming)
//!     → template.rs (parse path templates)
//!     → tree.rs (materialize dotted names into namespace trees)
//!
//! Invocation:
//!     caller Params → template.rs (substitute placeholders) → concrete path
//! ```
//!
//! # Design Decisions
//! - Trees are built once, immutable at runtime
//! - No router of our own: matching belongs to the host server
//! - Name collisions fail registration, never overwrite

pub mod spec;
pub mod template;
pub mod tree;

pub use spec::{Endpoint, SpecTree, Verbs};
pub use template::{substitute, Params, PathParams, PathTemplate, TemplateError};
pub use tree::{NamePath, Node, RouteMeta, Tree};
