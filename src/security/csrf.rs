//! Stateless anti-forgery tokens.
//!
//! Token layout: `{timestamp_ms}.{nonce_hex}.{signature_hex}` where the
//! signature is HMAC-SHA256 over `{timestamp_ms}.{nonce_hex}`. Nothing is
//! stored server side, so tokens cannot be revoked before they expire.

use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

use crate::security::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_COOKIE: &str = "csrf-token";

/// Token lifetime.
pub const TOKEN_MAX_AGE_MS: u64 = 60 * 60 * 1000;

const NONCE_BYTES: usize = 16;

/// Why a token was refused. The message is returned to the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("CSRF token missing")]
    Missing,

    #[error("CSRF token malformed")]
    Malformed,

    #[error("CSRF token signature invalid")]
    BadSignature,

    #[error("CSRF token expired")]
    Expired,

    #[error("Invalid CSRF secret: {0}")]
    Secret(String),
}

impl CsrfError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            CsrfError::Missing => "missing",
            CsrfError::Malformed => "malformed",
            CsrfError::BadSignature => "signature",
            CsrfError::Expired => "expired",
            CsrfError::Secret(_) => "secret",
        }
    }
}

/// Issues and checks CSRF tokens.
#[derive(Clone)]
pub struct CsrfGuard {
    mac: HmacSha256,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("CsrfGuard").finish_non_exhaustive()
    }
}

impl CsrfGuard {
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Result<Self, CsrfError> {
        let mac = HmacSha256::new_from_slice(secret).map_err(|e| CsrfError::Secret(e.to_string()))?;
        Ok(Self { mac, clock })
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Create a fresh token.
    pub fn issue(&self) -> String {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = format!("{}.{}", self.clock.now_ms(), hex::encode(nonce));
        let signature = hex::encode(self.sign(&payload));
        format!("{}.{}", payload, signature)
    }

    /// Check a token, reporting why it failed.
    pub fn verify(&self, token: &str) -> Result<(), CsrfError> {
        if token.is_empty() {
            return Err(CsrfError::Missing);
        }

        let parts: Vec<&str> = token.split('.').collect();
        let [timestamp, nonce, signature] = parts.as_slice() else {
            return Err(CsrfError::Malformed);
        };
        if timestamp.is_empty() || nonce.is_empty() || signature.is_empty() {
            return Err(CsrfError::Malformed);
        }

        let supplied = hex::decode(signature).map_err(|_| CsrfError::BadSignature)?;
        let mut mac = self.mac.clone();
        mac.update(format!("{}.{}", timestamp, nonce).as_bytes());
        mac.verify_slice(&supplied).map_err(|_| CsrfError::BadSignature)?;

        let issued_at: u64 = timestamp.parse().map_err(|_| CsrfError::Malformed)?;
        if self.clock.now_ms().saturating_sub(issued_at) > TOKEN_MAX_AGE_MS {
            return Err(CsrfError::Expired);
        }

        Ok(())
    }

    pub fn validate(&self, token: &str) -> bool {
        self.verify(token).is_ok()
    }
}

/// Token from the `X-CSRF-Token` header, falling back to the `csrf-token` cookie.
pub fn extract_from_request(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(token.to_string());
    }

    cookie_value(headers, CSRF_COOKIE)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value carrying a token.
///
/// Not `HttpOnly`: page scripts read the cookie to attach the header.
pub fn cookie_header(token: &str, production: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Strict",
        CSRF_COOKIE,
        token,
        TOKEN_MAX_AGE_MS / 1000
    );
    if production {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Meta tag for server-rendered pages.
pub fn meta_tag(token: &str) -> String {
    format!(r#"<meta name="csrf-token" content="{}">"#, token)
}

/// Whether the request is exempt from CSRF validation.
///
/// Safe methods are exempt, and so are API calls that authenticate with
/// `Authorization` or `X-API-Key` instead of ambient cookies.
pub fn is_exempt(method: &Method, path: &str, headers: &HeaderMap, api_prefix: &str) -> bool {
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return true;
    }
    path.starts_with(api_prefix)
        && (headers.contains_key("authorization") || headers.contains_key("x-api-key"))
}
