//! Security response headers.
//!
//! # Responsibilities
//! - Add the fixed hardening header set to every response that made it
//!   through the pipeline
//! - HSTS only in production (plain-HTTP development would pin browsers)
//! - Stamp audit headers for downstream log correlation

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Static part of the header set.
const BASE_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "permissions-policy",
        "camera=(), microphone=(), geolocation=(), payment=(self), usb=(), interest-cohort=()",
    ),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("x-security-audit", "passed"),
];

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

/// Header settings resolved from configuration.
#[derive(Debug, Clone, Default)]
pub struct SecurityHeaders {
    production: bool,
    content_security_policy: Option<HeaderValue>,
}

impl SecurityHeaders {
    /// A CSP string that is not a valid header value is ignored with a warning.
    pub fn new(production: bool, content_security_policy: Option<&str>) -> Self {
        let content_security_policy =
            content_security_policy.and_then(|csp| match HeaderValue::from_str(csp) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring invalid Content-Security-Policy value");
                    None
                }
            });
        Self {
            production,
            content_security_policy,
        }
    }

    /// Insert the header set, overwriting upstream values of the same name.
    pub fn apply(&self, headers: &mut HeaderMap, now_ms: u64) {
        for &(name, value) in BASE_HEADERS {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        if self.production {
            headers.insert("strict-transport-security", HeaderValue::from_static(HSTS));
        }
        if let Some(csp) = &self.content_security_policy {
            headers.insert("content-security-policy", csp.clone());
        }
        headers.insert("x-security-timestamp", HeaderValue::from(now_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_headers_present() {
        let mut headers = HeaderMap::new();
        SecurityHeaders::new(false, None).apply(&mut headers, 42);

        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-xss-protection"], "1; mode=block");
        assert_eq!(headers["x-security-audit"], "passed");
        assert_eq!(headers["x-security-timestamp"], "42");
        assert!(headers.contains_key("permissions-policy"));
        assert!(headers.contains_key("cross-origin-opener-policy"));
        assert!(!headers.contains_key("strict-transport-security"));
        assert!(!headers.contains_key("content-security-policy"));
    }

    #[test]
    fn test_production_adds_hsts_and_csp() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
        SecurityHeaders::new(true, Some("default-src 'self'")).apply(&mut headers, 0);

        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["strict-transport-security"], HSTS);
        assert_eq!(headers["content-security-policy"], "default-src 'self'");
    }

    #[test]
    fn test_invalid_csp_ignored() {
        let headers = SecurityHeaders::new(false, Some("bad\nvalue"));
        assert!(headers.content_security_policy.is_none());
    }
}
