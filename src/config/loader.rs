//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// HMAC secret for CSRF tokens.
pub const ENV_CSRF_SECRET: &str = "STOREFRONT_GUARD_CSRF_SECRET";
/// `production` switches on HSTS and secure cookies.
pub const ENV_MODE: &str = "STOREFRONT_GUARD_ENV";
/// Admin bearer key.
pub const ENV_ADMIN_KEY: &str = "STOREFRONT_GUARD_ADMIN_KEY";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

/// Overlay environment variables on a parsed configuration.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(secret) = lookup(ENV_CSRF_SECRET).filter(|s| !s.trim().is_empty()) {
        config.security.csrf_secret = secret;
    }
    if let Some(mode) = lookup(ENV_MODE) {
        config.security.production = mode.trim().eq_ignore_ascii_case("production");
    }
    if let Some(key) = lookup(ENV_ADMIN_KEY).filter(|s| !s.trim().is_empty()) {
        config.admin.api_key = key;
    }
}

/// Parse, apply the process environment and validate a TOML document.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let mut config: GatewayConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Built-in defaults plus environment, validated.
pub fn default_config() -> Result<GatewayConfig, ConfigError> {
    parse_config("")
}
