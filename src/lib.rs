//! Storefront security gateway library.
//!
//! A reverse proxy that puts rate limiting, CSRF validation, XSS filtering
//! and input sanitization in front of a storefront backend.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::pipeline::SecurityPipeline;
