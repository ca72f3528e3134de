//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Placeholder secret. Accepted in development, rejected by validation in production.
pub const DEFAULT_CSRF_SECRET: &str = "default-csrf-secret-change-in-production";

/// Root configuration for the security gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Storefront application that receives the cleaned requests.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Pipeline-wide security settings.
    pub security: SecurityConfig,

    /// Per route class policies. Empty means built-in defaults.
    pub route_classes: Vec<RouteClassConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream storefront configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the storefront (scheme and authority are used).
    pub url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Pipeline-wide security settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Production mode: HSTS header and `Secure` CSRF cookie.
    pub production: bool,

    /// HMAC key for CSRF tokens.
    pub csrf_secret: String,

    /// Requests under this prefix carrying `Authorization` or `X-API-Key` skip CSRF.
    pub api_prefix: String,

    /// Path served by the gateway itself to hand out CSRF tokens.
    pub csrf_token_path: String,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Interval of the rate-limit store sweep.
    pub cleanup_interval_secs: u64,

    /// Reject JSON bodies that fail to parse instead of forwarding them unsanitized.
    pub reject_malformed_json: bool,

    /// Optional `Content-Security-Policy` value added with the security headers.
    pub content_security_policy: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            production: false,
            csrf_secret: DEFAULT_CSRF_SECRET.to_string(),
            api_prefix: "/api/".to_string(),
            csrf_token_path: "/api/csrf-token".to_string(),
            max_body_bytes: 1024 * 1024, // 1MB
            cleanup_interval_secs: 300,
            reject_malformed_json: false,
            content_security_policy: None,
        }
    }
}

/// Route classes with their own security policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    Auth,
    Api,
    Contact,
    Search,
    General,
}

impl RouteClass {
    pub const ALL: [RouteClass; 5] = [
        RouteClass::Auth,
        RouteClass::Api,
        RouteClass::Contact,
        RouteClass::Search,
        RouteClass::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Auth => "auth",
            RouteClass::Api => "api",
            RouteClass::Contact => "contact",
            RouteClass::Search => "search",
            RouteClass::General => "general",
        }
    }
}

impl std::fmt::Display for RouteClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named rate-limit profiles.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitProfile {
    Auth,
    Api,
    General,
    Contact,
    Search,
}

impl RateLimitProfile {
    /// Window, limit and rejection message for this profile.
    pub fn rule(&self) -> RateLimitRule {
        let (window_ms, max_requests, message) = match self {
            RateLimitProfile::Auth => (
                15 * 60 * 1000,
                5,
                "Too many authentication attempts, please try again later.",
            ),
            RateLimitProfile::Api => {
                (60 * 1000, 100, "Too many API requests, please try again later.")
            }
            RateLimitProfile::General => {
                (60 * 1000, 200, "Too many requests, please try again later.")
            }
            RateLimitProfile::Contact => (
                60 * 60 * 1000,
                3,
                "Too many contact form submissions, please try again later.",
            ),
            RateLimitProfile::Search => {
                (60 * 1000, 50, "Too many search requests, please try again later.")
            }
        };
        RateLimitRule {
            window_ms,
            max_requests,
            message: Some(message.to_string()),
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }
}

/// A concrete fixed-window rule.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window_ms: u64,
    pub max_requests: u64,
    #[serde(default)]
    pub message: Option<String>,
    /// Revert the hit when the downstream response is < 400.
    #[serde(default)]
    pub skip_successful_requests: bool,
    /// Revert the hit when the downstream response is >= 400.
    #[serde(default)]
    pub skip_failed_requests: bool,
}

impl RateLimitRule {
    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or("Too many requests, please try again later.")
    }
}

/// Either a profile name (`rate_limit = "auth"`) or an inline rule.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RateLimitSetting {
    Profile(RateLimitProfile),
    Custom(RateLimitRule),
}

impl RateLimitSetting {
    pub fn resolve(&self) -> RateLimitRule {
        match self {
            RateLimitSetting::Profile(profile) => profile.rule(),
            RateLimitSetting::Custom(rule) => rule.clone(),
        }
    }
}

/// What the XSS stage does with a detection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum XssMode {
    /// Reject (400) in the pipeline; `clean` returns "" on any match.
    Block,
    /// Strip matches and escape the rest.
    #[default]
    Sanitize,
    /// Like sanitize, but log the detection first.
    Report,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct XssSettings {
    pub enabled: bool,
    pub mode: XssMode,
}

impl Default for XssSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: XssMode::Sanitize,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SanitizationSettings {
    pub sanitize_body: bool,
    pub sanitize_query: bool,
}

impl Default for SanitizationSettings {
    fn default() -> Self {
        Self {
            sanitize_body: true,
            sanitize_query: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeaderSettings {
    pub add_security_headers: bool,
}

impl Default for HeaderSettings {
    fn default() -> Self {
        Self {
            add_security_headers: true,
        }
    }
}

/// Security policy of one route class.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteClassConfig {
    /// Class this entry configures.
    pub class: RouteClass,

    /// Path prefixes resolving to this class (longest prefix wins).
    #[serde(default)]
    pub path_prefixes: Vec<String>,

    #[serde(default = "default_true")]
    pub csrf_enabled: bool,

    pub rate_limit: RateLimitSetting,

    #[serde(default)]
    pub xss: XssSettings,

    #[serde(default)]
    pub sanitization: SanitizationSettings,

    #[serde(default)]
    pub headers: HeaderSettings,
}

fn default_true() -> bool {
    true
}

impl RouteClassConfig {
    /// Built-in policy for a class.
    pub fn defaults_for(class: RouteClass) -> Self {
        let prefixes: &[&str] = match class {
            RouteClass::Auth => &["/api/auth", "/auth", "/login", "/register"],
            RouteClass::Api => &["/api"],
            RouteClass::Contact => &["/api/contact", "/contact"],
            RouteClass::Search => &["/api/search", "/search"],
            RouteClass::General => &["/"],
        };
        let (csrf_enabled, profile, mode, sanitize_body) = match class {
            RouteClass::Auth => (true, RateLimitProfile::Auth, XssMode::Block, true),
            RouteClass::Api => (true, RateLimitProfile::Api, XssMode::Sanitize, true),
            RouteClass::Contact => (true, RateLimitProfile::Contact, XssMode::Block, true),
            RouteClass::Search => (false, RateLimitProfile::Search, XssMode::Sanitize, false),
            RouteClass::General => (true, RateLimitProfile::General, XssMode::Report, true),
        };

        Self {
            class,
            path_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            csrf_enabled,
            rate_limit: RateLimitSetting::Profile(profile),
            xss: XssSettings { enabled: true, mode },
            sanitization: SanitizationSettings {
                sanitize_body,
                sanitize_query: true,
            },
            headers: HeaderSettings::default(),
        }
    }

    /// Built-in policies for all classes.
    pub fn defaults() -> Vec<Self> {
        RouteClass::ALL.iter().map(|c| Self::defaults_for(*c)).collect()
    }
}

impl GatewayConfig {
    /// Configured route classes, or the built-in set when none are given.
    pub fn effective_route_classes(&self) -> Vec<RouteClassConfig> {
        if self.route_classes.is_empty() {
            RouteClassConfig::defaults()
        } else {
            self.route_classes.clone()
        }
    }
}
