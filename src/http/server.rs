//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the token endpoint and the forwarding fallback
//! - Wire up middleware (request ID, tracing, timeout, body limit, panics,
//!   security pipeline)
//! - Bind server to listener, optionally alongside the admin listener
//! - Forward accepted requests to the upstream storefront

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::config::GatewayConfig;
use crate::http::request::RequestIdExt;
use crate::http::token::issue_csrf_token;
use crate::lifecycle::Shutdown;
use crate::security::clock::{Clock, SystemClock};
use crate::security::csrf::CsrfError;
use crate::security::pipeline::{panic_response, security_middleware, SecurityPipeline};
use crate::security::rate_limit::{InMemoryStore, RateLimiter};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("security pipeline: {0}")]
    Csrf(#[from] CsrfError),

    #[error("invalid upstream url '{url}': {reason}")]
    Upstream { url: String, reason: String },
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SecurityPipeline>,
    pub client: Client<HttpConnector, Body>,
    /// Upstream origin, e.g. `http://127.0.0.1:3000`.
    pub upstream: Arc<str>,
    pub shutdown: Shutdown,
    pub started_at: Instant,
    pub admin_key: Arc<str>,
}

/// HTTP server for the storefront gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a server with the production clock and an in-memory rate-limit
    /// store swept every `security.cleanup_interval_secs`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: GatewayConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), clock.clone()).with_sweeper(
            Duration::from_secs(config.security.cleanup_interval_secs),
            shutdown.subscribe(),
        );
        let pipeline = SecurityPipeline::new(&config, limiter, clock)?;
        Self::with_pipeline(config, Arc::new(pipeline), shutdown)
    }

    /// Create a server around an existing pipeline.
    pub fn with_pipeline(
        config: GatewayConfig,
        pipeline: Arc<SecurityPipeline>,
        shutdown: Shutdown,
    ) -> Result<Self, ServerError> {
        let upstream = url::Url::parse(&config.upstream.url).map_err(|e| ServerError::Upstream {
            url: config.upstream.url.clone(),
            reason: e.to_string(),
        })?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let state = AppState {
            pipeline,
            client,
            upstream: upstream.origin().ascii_serialization().into(),
            shutdown,
            started_at: Instant::now(),
            admin_key: config.admin.api_key.as_str().into(),
        };

        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            config,
            state,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let pipeline = state.pipeline.clone();
        Router::new()
            .route(&config.security.csrf_token_path, get(issue_csrf_token))
            .fallback(proxy_handler)
            .with_state(state)
            .layer(middleware::from_fn_with_state(pipeline, security_middleware))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(RequestBodyLimitLayer::new(config.security.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The public router, for driving the gateway without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// The operator API, served on `admin.bind_address` when enabled.
    pub fn admin_router(&self) -> Router {
        setup_admin_router(self.state.clone())
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.state.upstream,
            "HTTP server starting"
        );

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            let admin = self.admin_router();
            let admin_shutdown = self.state.shutdown.clone();
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move { admin_shutdown.wait().await })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            });
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.state.shutdown.clone();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<SecurityPipeline> {
        &self.state.pipeline
    }
}

/// Forward a request that passed the pipeline to the upstream.
async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let request_id = request.request_id().to_string();
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = match format!("{}{}", state.upstream, path_and_query).parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream URI");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        uri = %uri,
        "Forwarding request"
    );

    parts.uri = uri;
    strip_hop_by_hop(&mut parts.headers);
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    if let Some(peer) = peer {
        append_forwarded_for(&mut parts.headers, peer);
    }

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
