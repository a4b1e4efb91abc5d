//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::transport::DEFAULT_MAX_FRAME_SIZE;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server listener and connection settings.
    pub server: ServerConfig,

    /// Outbound client settings.
    pub client: ClientConfig,

    /// Trace generation settings.
    pub tracing: TracingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:9410").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Largest frame accepted from a peer, in bytes.
    pub max_frame_size: usize,

    /// Reject envelopes without a version word.
    pub strict_read: bool,

    /// How long to wait for open connections after shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9410".to_string(),
            max_connections: 1_024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            strict_read: false,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Peer address (e.g., "127.0.0.1:9410").
    pub address: String,

    /// Name of the calling service, sent with every request header.
    pub client_id: Option<String>,

    /// TCP connect timeout.
    pub connect_timeout_ms: u64,

    /// Deadline for one call, including the upgrade probe.
    pub request_timeout_ms: u64,

    /// Largest frame accepted from the peer, in bytes.
    pub max_frame_size: usize,

    /// Reject envelopes without a version word.
    pub strict_read: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9410".to_string(),
            client_id: None,
            connect_timeout_ms: 1_000,
            request_timeout_ms: 5_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            strict_read: true,
        }
    }
}

/// Trace generation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Fraction of new root traces marked sampled, in [0, 1].
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { sample_rate: 1.0 }
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
