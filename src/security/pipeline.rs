//! Request security pipeline.
//!
//! # Data Flow
//! ```text
//! request
//!     → RouteClassifier (path → SecurityPolicy)
//!     → rate limit      (429 + Retry-After)
//!     → CSRF            (403)
//!     → XSS             (400 in block mode, cleaned otherwise)
//!     → sanitization    (query and JSON body rewritten)
//!     → downstream handler
//!     → settle rate-limit hit, add X-RateLimit-* and security headers
//! ```
//!
//! # Design Decisions
//! - Each stage short-circuits with its own response; later stages never run
//! - Rejections are values ([`Rejection`]), internal failures are
//!   [`PipelineError`] and always surface as the same opaque 500
//! - Malformed JSON bodies are forwarded untouched unless
//!   `reject_malformed_json` is set

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{
        header,
        uri::{InvalidUri, InvalidUriParts, PathAndQuery},
        HeaderMap, HeaderValue, Method, StatusCode, Uri,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::LengthLimitError;
use serde_json::{json, Value};
use thiserror::Error;
use url::form_urlencoded;

use crate::config::schema::{GatewayConfig, XssMode};
use crate::http::request::RequestIdExt;
use crate::observability::metrics;
use crate::routing::router::{RouteClassifier, SecurityPolicy};
use crate::security::clock::Clock;
use crate::security::csrf::{self, CsrfError, CsrfGuard};
use crate::security::headers::SecurityHeaders;
use crate::security::rate_limit::{client_ip, RateLimitDecision, RateLimitInfo, RateLimiter};
use crate::security::{sanitize, xss};

/// Body of every 500 the pipeline produces.
pub const INTERNAL_ERROR_MESSAGE: &str = "Security validation failed";

/// Unexpected failure inside the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),

    #[error("failed to encode sanitized body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sanitized query is not a valid URI: {0}")]
    Query(#[from] InvalidUri),

    #[error("failed to rebuild request URI: {0}")]
    Uri(#[from] InvalidUriParts),
}

/// Why a request was stopped before reaching the handler.
#[derive(Debug)]
pub enum Rejection {
    RateLimited {
        message: String,
        retry_after_secs: u64,
        info: RateLimitInfo,
    },
    Csrf(CsrfError),
    Xss {
        location: String,
    },
    MalformedJson,
    PayloadTooLarge,
    Internal(PipelineError),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::Csrf(_) => StatusCode::FORBIDDEN,
            Rejection::Xss { .. } | Rejection::MalformedJson => StatusCode::BAD_REQUEST,
            Rejection::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for Rejection {
    fn from(e: PipelineError) -> Self {
        Rejection::Internal(e)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Rejection::RateLimited {
                message,
                retry_after_secs,
                info,
            } => {
                let body = json!({ "error": message, "retryAfter": retry_after_secs });
                let mut response = (status, Json(body)).into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                info.apply_headers(headers);
                response
            }
            Rejection::Csrf(e) => (status, Json(json!({ "error": e.to_string() }))).into_response(),
            Rejection::Xss { location } => (
                status,
                Json(json!({
                    "error": "Potentially malicious input detected",
                    "location": location,
                })),
            )
                .into_response(),
            Rejection::MalformedJson => {
                (status, Json(json!({ "error": "Malformed JSON body" }))).into_response()
            }
            Rejection::PayloadTooLarge => {
                (status, Json(json!({ "error": "Request body too large" }))).into_response()
            }
            Rejection::Internal(_) => internal_error_response(),
        }
    }
}

/// The generic 500 used for every internal failure.
pub fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": INTERNAL_ERROR_MESSAGE })),
    )
        .into_response()
}

/// Response for `CatchPanicLayer::custom`.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Request handler panicked");
    internal_error_response()
}

/// Flags that apply to every route class.
#[derive(Debug, Clone)]
struct PipelineSettings {
    api_prefix: String,
    max_body_bytes: usize,
    reject_malformed_json: bool,
    production: bool,
}

/// Rate limiting, CSRF, XSS filtering and sanitization in one middleware.
#[derive(Debug)]
pub struct SecurityPipeline {
    classifier: RouteClassifier,
    limiter: RateLimiter,
    csrf: CsrfGuard,
    headers: SecurityHeaders,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl SecurityPipeline {
    /// Build from configuration with an already constructed limiter, so the
    /// caller decides on the store and whether a sweeper runs.
    pub fn new(
        config: &GatewayConfig,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CsrfError> {
        let security = &config.security;
        let csrf = CsrfGuard::new(security.csrf_secret.as_bytes(), clock.clone())?;

        Ok(Self {
            classifier: RouteClassifier::from_config(&config.effective_route_classes()),
            limiter,
            csrf,
            headers: SecurityHeaders::new(
                security.production,
                security.content_security_policy.as_deref(),
            ),
            clock,
            settings: PipelineSettings {
                api_prefix: security.api_prefix.clone(),
                max_body_bytes: security.max_body_bytes,
                reject_malformed_json: security.reject_malformed_json,
                production: security.production,
            },
        })
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn classifier(&self) -> &RouteClassifier {
        &self.classifier
    }

    pub fn production(&self) -> bool {
        self.settings.production
    }

    async fn process(&self, request: Request, next: Next) -> Result<Response, Rejection> {
        let start = Instant::now();
        let path = request.uri().path().to_string();
        let policy = self.classifier.classify(&path);
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = client_ip(request.headers(), peer);
        let request_id = request.request_id().to_string();

        let mut info = match self.limiter.check_and_record(&ip, &path, &policy.rate_limit) {
            RateLimitDecision::Allowed(info) => info,
            RateLimitDecision::Rejected {
                retry_after_secs,
                info,
            } => {
                tracing::warn!(
                    request_id = %request_id,
                    client = %ip,
                    path = %path,
                    class = %policy.class,
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limited(policy.class.as_str());
                metrics::record_request(policy.class.as_str(), 429, start);
                return Err(Rejection::RateLimited {
                    message: policy.rate_limit.message().to_string(),
                    retry_after_secs,
                    info,
                });
            }
        };

        let request = match self.inspect(request, &policy, &request_id).await {
            Ok(request) => request,
            Err(rejection) => {
                let status = rejection.status();
                self.limiter.settle(&info, &policy.rate_limit, status);
                metrics::record_request(policy.class.as_str(), status.as_u16(), start);
                return Err(rejection);
            }
        };

        let mut response = next.run(request).await;
        let status = response.status();
        if self.limiter.settle(&info, &policy.rate_limit, status) {
            info.refund();
        }

        let headers = response.headers_mut();
        info.apply_headers(headers);
        if policy.headers.add_security_headers {
            self.headers.apply(headers, self.clock.now_ms());
        }

        tracing::debug!(
            request_id = %request_id,
            path = %path,
            class = %policy.class,
            status = status.as_u16(),
            "Request passed security pipeline"
        );
        metrics::record_request(policy.class.as_str(), status.as_u16(), start);
        Ok(response)
    }

    /// CSRF, XSS and sanitization stages.
    async fn inspect(
        &self,
        request: Request,
        policy: &SecurityPolicy,
        request_id: &str,
    ) -> Result<Request, Rejection> {
        if policy.csrf_enabled
            && !csrf::is_exempt(
                request.method(),
                request.uri().path(),
                request.headers(),
                &self.settings.api_prefix,
            )
        {
            let token = csrf::extract_from_request(request.headers()).unwrap_or_default();
            if let Err(e) = self.csrf.verify(&token) {
                tracing::warn!(
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    reason = e.reason(),
                    "CSRF validation failed"
                );
                metrics::record_csrf_rejected(e.reason());
                return Err(Rejection::Csrf(e));
            }
        }

        let request = self.filter_query(request, policy, request_id)?;
        self.filter_body(request, policy, request_id).await
    }

    fn filter_query(
        &self,
        request: Request,
        policy: &SecurityPolicy,
        request_id: &str,
    ) -> Result<Request, Rejection> {
        let Some(query) = request.uri().query() else {
            return Ok(request);
        };
        let original: Vec<(String, String)> =
            form_urlencoded::parse(query.as_bytes()).into_owned().collect();
        let mut pairs = original.clone();

        if policy.xss.enabled {
            match policy.xss.mode {
                XssMode::Block => {
                    if let Some((name, _)) =
                        pairs.iter().find(|(k, v)| xss::detect(k) || xss::detect(v))
                    {
                        tracing::warn!(
                            request_id = %request_id,
                            parameter = %name,
                            "XSS detected in query parameter, blocking"
                        );
                        metrics::record_xss_detected("block");
                        return Err(Rejection::Xss {
                            location: format!("query parameter '{}'", name),
                        });
                    }
                }
                mode => {
                    let clean_if_detected = |s: String| {
                        if xss::detect(&s) {
                            xss::clean(&s, mode)
                        } else {
                            s
                        }
                    };
                    pairs = pairs
                        .into_iter()
                        .map(|(k, v)| (clean_if_detected(k), clean_if_detected(v)))
                        .collect();
                }
            }
        }

        if policy.sanitization.sanitize_query {
            pairs = pairs
                .into_iter()
                .map(|(k, v)| {
                    let v = sanitize::sanitize_input(&v);
                    (k, v)
                })
                .collect();
        }

        if pairs == original {
            return Ok(request);
        }

        tracing::debug!(request_id = %request_id, "Rewrote query parameters");
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&pairs)
            .finish();
        let (mut parts, body) = request.into_parts();
        parts.uri = with_query(&parts.uri, &query)?;
        Ok(Request::from_parts(parts, body))
    }

    async fn filter_body(
        &self,
        request: Request,
        policy: &SecurityPolicy,
        request_id: &str,
    ) -> Result<Request, Rejection> {
        let mutating = matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH);
        let wanted = policy.xss.enabled || policy.sanitization.sanitize_body;
        if !mutating || !wanted || !is_json(request.headers()) {
            return Ok(request);
        }

        let (mut parts, body) = request.into_parts();
        let bytes = match axum::body::to_bytes(body, self.settings.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) if exceeds_length_limit(&e) => {
                tracing::warn!(request_id = %request_id, "Request body over the size limit");
                return Err(Rejection::PayloadTooLarge);
            }
            Err(e) => return Err(PipelineError::Body(e).into()),
        };
        if bytes.is_empty() {
            return Ok(Request::from_parts(parts, Body::from(bytes)));
        }

        let mut value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                metrics::record_malformed_json();
                if self.settings.reject_malformed_json {
                    tracing::warn!(
                        request_id = %request_id,
                        error = %e,
                        "Rejecting malformed JSON body"
                    );
                    return Err(Rejection::MalformedJson);
                }
                tracing::warn!(
                    request_id = %request_id,
                    error = %e,
                    "Malformed JSON body, forwarding unsanitized"
                );
                return Ok(Request::from_parts(parts, Body::from(bytes)));
            }
        };

        if policy.xss.enabled {
            match policy.xss.mode {
                XssMode::Block => {
                    if xss::detect_in_value(&value) {
                        tracing::warn!(
                            request_id = %request_id,
                            "XSS detected in request body, blocking"
                        );
                        metrics::record_xss_detected("block");
                        return Err(Rejection::Xss {
                            location: "request body".to_string(),
                        });
                    }
                }
                mode => {
                    let (cleaned, hits) = xss::clean_threats(value, mode);
                    if hits > 0 && mode == XssMode::Sanitize {
                        tracing::warn!(
                            request_id = %request_id,
                            hits,
                            "XSS cleaned from request body"
                        );
                        metrics::record_xss_detected("sanitize");
                    }
                    value = cleaned;
                }
            }
        }

        if policy.sanitization.sanitize_body {
            value = sanitize::sanitize_object(value);
        }

        let encoded = serde_json::to_vec(&value).map_err(PipelineError::Encode)?;
        parts.headers.remove(header::TRANSFER_ENCODING);
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        Ok(Request::from_parts(parts, Body::from(encoded)))
    }
}

/// axum middleware entry point; wire with `middleware::from_fn_with_state`.
pub async fn security_middleware(
    State(pipeline): State<Arc<SecurityPipeline>>,
    request: Request,
    next: Next,
) -> Response {
    match pipeline.process(request, next).await {
        Ok(response) => response,
        Err(Rejection::Internal(e)) => {
            tracing::error!(error = %e, "Security pipeline failed");
            internal_error_response()
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// True when reading the body stopped at a length limit, either ours or the
/// outer `RequestBodyLimitLayer` on a body without `Content-Length`.
fn exceeds_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn with_query(uri: &Uri, query: &str) -> Result<Uri, PipelineError> {
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), query)
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse::<PathAndQuery>()?);
    Ok(Uri::from_parts(parts)?)
}
