//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0, rate in [0, 1])
//! - Check addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::AppConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint and report all violations.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be > 0"));
    }
    if config.server.max_frame_size == 0 {
        errors.push(ValidationError::new("server.max_frame_size", "must be > 0"));
    }

    if config.client.address.trim().is_empty() {
        errors.push(ValidationError::new("client.address", "must not be empty"));
    }
    if let Some(name) = &config.client.client_id {
        if name.trim().is_empty() {
            errors.push(ValidationError::new(
                "client.client_id",
                "must not be blank when set",
            ));
        }
    }
    if config.client.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("client.connect_timeout_ms", "must be > 0"));
    }
    if config.client.request_timeout_ms == 0 {
        errors.push(ValidationError::new("client.request_timeout_ms", "must be > 0"));
    }
    if config.client.max_frame_size == 0 {
        errors.push(ValidationError::new("client.max_frame_size", "must be > 0"));
    }

    let rate = config.tracing.sample_rate;
    if !(0.0..=1.0).contains(&rate) {
        errors.push(ValidationError::new(
            "tracing.sample_rate",
            format!("{} is outside [0, 1]", rate),
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
