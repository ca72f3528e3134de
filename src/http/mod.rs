//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tower-http layers, request ID)
//!     → security::pipeline (rate limit, CSRF, XSS, sanitization)
//!     → token.rs (CSRF token endpoint) or upstream forwarding
//!     → Send to client
//! ```

pub mod request;
pub mod server;
pub mod token;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer, ServerError};
