//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows and limits > 0, addresses parse)
//! - Refuse the placeholder CSRF secret in production
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, DEFAULT_CSRF_SECRET};

/// Minimum secret length accepted in production.
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.url: {0}")]
    InvalidUpstream(String),

    #[error("route class '{class}': {reason}")]
    InvalidRouteClass { class: String, reason: String },

    #[error("security.csrf_secret: {0}")]
    WeakSecret(String),

    #[error("{field}: path '{value}' must start with '/'")]
    InvalidPath { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Check a configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut check_addr = |field: &'static str, value: &str| {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field,
                value: value.to_string(),
            });
        }
    };
    check_addr("listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_addr("observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_addr("admin.bind_address", &config.admin.bind_address);
    }

    match url::Url::parse(&config.upstream.url) {
        Ok(u) if matches!(u.scheme(), "http") && u.host().is_some() => {}
        Ok(u) => errors.push(ValidationError::InvalidUpstream(format!(
            "scheme '{}' unsupported, expected http",
            u.scheme()
        ))),
        Err(e) => errors.push(ValidationError::InvalidUpstream(e.to_string())),
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.request_secs" });
    }
    if config.security.max_body_bytes == 0 {
        errors.push(ValidationError::Zero { field: "security.max_body_bytes" });
    }
    if config.security.cleanup_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "security.cleanup_interval_secs" });
    }

    for (field, path) in [
        ("security.api_prefix", &config.security.api_prefix),
        ("security.csrf_token_path", &config.security.csrf_token_path),
    ] {
        if !path.starts_with('/') {
            errors.push(ValidationError::InvalidPath {
                field,
                value: path.clone(),
            });
        }
    }

    if config.security.production {
        if config.security.csrf_secret == DEFAULT_CSRF_SECRET {
            errors.push(ValidationError::WeakSecret(
                "the default secret must be overridden in production".into(),
            ));
        } else if config.security.csrf_secret.len() < MIN_PRODUCTION_SECRET_LEN {
            errors.push(ValidationError::WeakSecret(format!(
                "must be at least {} bytes in production",
                MIN_PRODUCTION_SECRET_LEN
            )));
        }
    } else if config.security.csrf_secret.is_empty() {
        errors.push(ValidationError::WeakSecret("must not be empty".into()));
    }

    let mut seen = HashSet::new();
    for route_class in &config.route_classes {
        let class = route_class.class.to_string();
        let mut fail = |reason: String| {
            errors.push(ValidationError::InvalidRouteClass {
                class: class.clone(),
                reason,
            })
        };

        if !seen.insert(route_class.class) {
            fail("configured more than once".into());
        }
        for prefix in &route_class.path_prefixes {
            if !prefix.starts_with('/') {
                fail(format!("path prefix '{}' must start with '/'", prefix));
            }
        }
        let rule = route_class.rate_limit.resolve();
        if rule.window_ms == 0 {
            fail("rate_limit.window_ms must be greater than zero".into());
        }
        if rule.max_requests == 0 {
            fail("rate_limit.max_requests must be greater than zero".into());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
