//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a service built on the dual-route core.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Host server settings (bind address, limits, timeouts).
    pub server: ServerConfig,

    /// Api builder settings.
    pub api: ApiConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Host server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Request timeout applied to the wire and loopback paths, in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request and loopback response body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// How an in-process invocation executes an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Replay the endpoint's hooks and handler against a buffered response.
    /// No serialization of the request, full hook fidelity.
    #[default]
    HookReplay,

    /// Push a synthetic request through the sealed host router in-process.
    /// Runs every layer a wire client would hit; costs a body round-trip.
    Loopback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::HookReplay => "hook_replay",
            Strategy::Loopback => "loopback",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hook_replay" | "hook-replay" => Ok(Strategy::HookReplay),
            "loopback" => Ok(Strategy::Loopback),
            other => Err(format!("unknown invocation strategy '{}'", other)),
        }
    }
}

/// Api builder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Capability name the finished api is attached under on the host server.
    pub decorate_as: String,

    /// Default invocation strategy for exposed endpoints.
    pub strategy: Strategy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            decorate_as: "api".to_string(),
            strategy: Strategy::default(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
