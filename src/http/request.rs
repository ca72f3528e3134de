//! Request identification.
//!
//! IDs are assigned by tower-http's `SetRequestIdLayer` as early as possible
//! so every log line for a request can be correlated; this module only reads
//! them back.

use axum::http::{HeaderName, Request};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Access to the request ID assigned at the edge of the service stack.
pub trait RequestIdExt {
    /// The ID, or `"unknown"` if none was assigned.
    fn request_id(&self) -> &str;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}
