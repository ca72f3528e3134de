//! Security pipeline driven in-process with a manual clock.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware,
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use storefront_guard::config::schema::{
    RateLimitRule, RateLimitSetting, RouteClass, RouteClassConfig,
};
use storefront_guard::config::GatewayConfig;
use storefront_guard::security::{
    security_middleware, InMemoryStore, ManualClock, RateLimiter, SecurityPipeline,
};

mod common;

const T0: u64 = 1_700_000_000_000;
const CLIENT: &str = "203.0.113.5";

struct Harness {
    app: Router,
    pipeline: Arc<SecurityPipeline>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(config: &GatewayConfig) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), clock.clone());
        let pipeline = Arc::new(SecurityPipeline::new(config, limiter, clock.clone()).unwrap());
        let app = common::echo_router().layer(middleware::from_fn_with_state(
            pipeline.clone(),
            security_middleware,
        ));
        Self { app, pipeline, clock }
    }

    fn with_defaults() -> Self {
        Self::new(&GatewayConfig::default())
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    fn token(&self) -> String {
        self.pipeline.csrf().issue()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", CLIENT)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", CLIENT)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header("x-csrf-token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// What the echo handler saw as the request body, parsed as JSON.
fn forwarded_body(echo: &Value) -> Value {
    serde_json::from_str(echo["body"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_auth_rate_limit_scenario() {
    let h = Harness::with_defaults();

    for i in 1..=5u64 {
        let response = h.send(get("/api/auth/session")).await;
        assert_eq!(response.status(), StatusCode::OK, "request {}", i);
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            (5 - i).to_string().as_str()
        );
    }

    h.clock.advance_ms(60_000);
    let response = h.send(get("/api/auth/session")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "840");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(response.headers()["x-ratelimit-reset"], "1700000900");
    let body = common::json_body(response).await;
    assert_eq!(body["retryAfter"], 840);
    assert_eq!(
        body["error"],
        "Too many authentication attempts, please try again later."
    );

    // Another client is unaffected.
    let other = Request::builder()
        .uri("/api/auth/session")
        .header("x-forwarded-for", "198.51.100.20")
        .body(Body::empty())
        .unwrap();
    assert_eq!(h.send(other).await.status(), StatusCode::OK);

    // A new window starts after the reset time.
    h.clock.advance_ms(15 * 60 * 1000);
    let response = h.send(get("/api/auth/session")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
}

#[tokio::test]
async fn test_rate_limit_keys_include_path() {
    let h = Harness::with_defaults();
    for _ in 0..5 {
        h.send(get("/api/auth/session")).await;
    }
    assert_eq!(
        h.send(get("/api/auth/session")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(h.send(get("/api/auth/providers")).await.status(), StatusCode::OK);
    assert_eq!(h.pipeline.limiter().tracked_keys(), 2);
}

#[tokio::test]
async fn test_csrf_required_on_mutations() {
    let h = Harness::with_defaults();

    let response = h.send(post_json("/api/cart", None, "{}")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(common::json_body(response).await["error"], "CSRF token missing");

    let token = h.token();
    let response = h.send(post_json("/api/cart", Some(&token), "{}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The cookie works as well as the header.
    let request = Request::builder()
        .method("POST")
        .uri("/api/cart")
        .header("x-forwarded-for", CLIENT)
        .header(header::COOKIE, format!("theme=dark; csrf-token={}", token))
        .body(Body::empty())
        .unwrap();
    assert_eq!(h.send(request).await.status(), StatusCode::OK);

    let mut tampered = token.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == '0' { '1' } else { '0' });
    let response = h.send(post_json("/api/cart", Some(&tampered), "{}")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        common::json_body(response).await["error"],
        "CSRF token signature invalid"
    );
}

#[tokio::test]
async fn test_csrf_token_expires() {
    let h = Harness::with_defaults();
    let token = h.token();

    h.clock.advance_ms(3_600_000);
    let response = h.send(post_json("/api/cart", Some(&token), "{}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    h.clock.advance_ms(1);
    let response = h.send(post_json("/api/cart", Some(&token), "{}")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(common::json_body(response).await["error"], "CSRF token expired");
}

#[tokio::test]
async fn test_csrf_exemptions() {
    let h = Harness::with_defaults();

    // API clients authenticating with a credential header are exempt.
    let request = Request::builder()
        .method("DELETE")
        .uri("/api/cart/items/7")
        .header("x-forwarded-for", CLIENT)
        .header(header::AUTHORIZATION, "Bearer abc")
        .body(Body::empty())
        .unwrap();
    assert_eq!(h.send(request).await.status(), StatusCode::OK);

    // The same header outside the API prefix does not help.
    let request = Request::builder()
        .method("POST")
        .uri("/account/settings")
        .header("x-forwarded-for", CLIENT)
        .header("x-api-key", "abc")
        .body(Body::empty())
        .unwrap();
    assert_eq!(h.send(request).await.status(), StatusCode::FORBIDDEN);

    // Search has CSRF disabled.
    let response = h
        .send(post_json("/api/search", None, r#"{"q":"boots"}"#))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_block_mode_rejects_query_threat() {
    let h = Harness::with_defaults();
    let response = h
        .send(get("/api/auth/callback?next=%3Cscript%3Ealert(1)%3C%2Fscript%3E"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!response.headers().contains_key("x-security-audit"));
    let body = common::json_body(response).await;
    assert!(body["location"].as_str().unwrap().contains("next"));

    // Markup that matches no threat pattern is only stripped of brackets.
    let response = h.send(get("/api/auth/callback?next=%3Cb%3E")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::json_body(response).await["query"], "next=b");
}

#[tokio::test]
async fn test_block_mode_rejects_body_threat() {
    let h = Harness::with_defaults();
    let token = h.token();
    let body = json!({ "email": "a@b.co", "message": "<script>alert(1)</script>" }).to_string();
    let response = h.send(post_json("/api/contact", Some(&token), &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(common::json_body(response).await["location"], "request body");
}

#[tokio::test]
async fn test_body_sanitized_before_forwarding() {
    let h = Harness::with_defaults();
    let token = h.token();
    let body = json!({
        "name": "<script>alert(1)</script>Widget",
        "note": "  gift wrap  ",
        "link": "https://shop.example/p/42",
        "qty": 2,
        "tags": ["<b>sale</b>"],
    })
    .to_string();

    let response = h.send(post_json("/api/cart", Some(&token), &body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let echo = common::json_body(response).await;
    let sent = forwarded_body(&echo);

    let name = sent["name"].as_str().unwrap();
    assert!(!name.to_lowercase().contains("<script"));
    assert!(name.contains("Widget"));
    assert_eq!(sent["note"], "gift wrap");
    assert_eq!(sent["link"], "https://shop.example/p/42");
    assert_eq!(sent["qty"], 2);
    assert_eq!(sent["tags"][0], "bsale/b");
}

#[tokio::test]
async fn test_query_sanitized_before_forwarding() {
    let h = Harness::with_defaults();

    let response = h.send(get("/api/products?q=shoes%22%3B&page=2")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::json_body(response).await["query"], "q=shoes&page=2");

    // Clean queries are forwarded byte for byte.
    let response = h.send(get("/api/products?q=red+shoes&sort=price")).await;
    assert_eq!(
        common::json_body(response).await["query"],
        "q=red+shoes&sort=price"
    );
}

#[tokio::test]
async fn test_report_mode_cleans_and_passes() {
    let h = Harness::with_defaults();
    let response = h.send(get("/blog?q=%3Cscript%3Ealert(1)%3C%2Fscript%3Enews")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let echo = common::json_body(response).await;
    let query = echo["query"].as_str().unwrap();
    assert!(!query.to_lowercase().contains("script"));
    assert!(query.contains("news"));
}

#[tokio::test]
async fn test_malformed_json_fails_open() {
    let h = Harness::with_defaults();
    let token = h.token();
    let response = h
        .send(post_json("/api/cart", Some(&token), r#"{"name": "#))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let echo = common::json_body(response).await;
    assert_eq!(echo["body"], r#"{"name": "#);
}

#[tokio::test]
async fn test_malformed_json_rejected_when_configured() {
    let mut config = GatewayConfig::default();
    config.security.reject_malformed_json = true;
    let h = Harness::new(&config);
    let token = h.token();
    let response = h
        .send(post_json("/api/cart", Some(&token), r#"{"name": "#))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(common::json_body(response).await["error"], "Malformed JSON body");
}

#[tokio::test]
async fn test_oversized_json_body_is_payload_too_large() {
    let mut config = GatewayConfig::default();
    config.security.max_body_bytes = 64;
    let h = Harness::new(&config);
    let token = h.token();
    let body = format!(r#"{{"note":"{}"}}"#, "x".repeat(256));

    let response = h.send(post_json("/api/cart", Some(&token), &body)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(common::json_body(response).await["error"], "Request body too large");
}

#[tokio::test]
async fn test_security_headers_added() {
    let h = Harness::with_defaults();
    let response = h.send(get("/products")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-xss-protection"], "1; mode=block");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
    assert_eq!(headers["x-security-audit"], "passed");
    assert_eq!(headers["x-security-timestamp"], T0.to_string().as_str());
    assert_eq!(headers["x-ratelimit-limit"], "200");
    assert!(!headers.contains_key("strict-transport-security"));
    assert!(!headers.contains_key("content-security-policy"));
}

#[tokio::test]
async fn test_production_headers() {
    let mut config = GatewayConfig::default();
    config.security.production = true;
    config.security.content_security_policy = Some("default-src 'self'".into());
    let h = Harness::new(&config);

    let response = h.send(get("/products")).await;
    let headers = response.headers();
    assert!(headers
        .get("strict-transport-security")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("max-age=31536000"));
    assert_eq!(headers["content-security-policy"], "default-src 'self'");
}

#[tokio::test]
async fn test_skip_failed_requests() {
    let mut api = RouteClassConfig::defaults_for(RouteClass::Api);
    api.rate_limit = RateLimitSetting::Custom(RateLimitRule {
        window_ms: 60_000,
        max_requests: 2,
        message: None,
        skip_successful_requests: false,
        skip_failed_requests: true,
    });
    let mut config = GatewayConfig::default();
    config.route_classes = vec![api, RouteClassConfig::defaults_for(RouteClass::General)];
    let h = Harness::new(&config);

    // Failed responses are not counted, and the headers report the refunded slot.
    for _ in 0..5 {
        let response = h.send(get("/api/status/500")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "2");
    }

    // Successful ones are.
    assert_eq!(h.send(get("/api/status/200")).await.status(), StatusCode::OK);
    assert_eq!(h.send(get("/api/status/200")).await.status(), StatusCode::OK);
    let response = h.send(get("/api/status/200")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        common::json_body(response).await["error"],
        "Too many requests, please try again later."
    );
}
