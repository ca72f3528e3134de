use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::routing::router::SecurityPolicy;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub production: bool,
    pub tracked_rate_limit_keys: usize,
}

#[derive(Serialize)]
pub struct RateLimitEntryView {
    pub key: String,
    pub count: u64,
    pub reset_time_ms: u64,
}

#[derive(Serialize)]
pub struct RateLimitSummary {
    pub tracked_keys: usize,
    pub entries: Vec<RateLimitEntryView>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if state.shutdown.is_triggered() {
            "draining"
        } else {
            "operational"
        },
        uptime_secs: state.started_at.elapsed().as_secs(),
        production: state.pipeline.production(),
        tracked_rate_limit_keys: state.pipeline.limiter().tracked_keys(),
    })
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitSummary> {
    let mut entries: Vec<RateLimitEntryView> = state
        .pipeline
        .limiter()
        .snapshot()
        .into_iter()
        .map(|(key, entry)| RateLimitEntryView {
            key,
            count: entry.count,
            reset_time_ms: entry.reset_time_ms,
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));

    Json(RateLimitSummary {
        tracked_keys: entries.len(),
        entries,
    })
}

pub async fn get_policies(State(state): State<AppState>) -> Json<Vec<SecurityPolicy>> {
    let policies = state.pipeline.classifier().policies();
    Json(policies.iter().map(|p| SecurityPolicy::clone(p)).collect())
}
