//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → ServerConfig handed to the host server, ApiConfig to the api builder
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; the route trees it shapes never change afterwards
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ApiConfig, ObservabilityConfig, ServerConfig, ServiceConfig, Strategy};
