//! Read-only status routes plus the two manual triggers.
//!
//! Worker and diff failures are operational state, not HTTP errors: a diff
//! run against a hostile origin returns 200 with a zero-new summary and a
//! note. Only the control surface's own failures (bad input, store down)
//! produce error statuses.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use sumika_worker::DiffSummary;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/queue/stats", get(queue_stats))
        .route("/scrape/list", post(scrape_list))
        .route("/scheduler/run", post(scheduler_run))
        .route("/ratelimit/stats", get(ratelimit_stats))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct QueueStatsResponse {
    pending: i64,
    processing: i64,
    done: i64,
    failed: i64,
    permanent_fail: i64,
    is_running: bool,
}

async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStatsResponse>, ApiError> {
    let counts = state.queue.counts().await?;
    Ok(Json(QueueStatsResponse {
        pending: counts.pending,
        processing: counts.processing,
        done: counts.done,
        failed: counts.failed,
        permanent_fail: counts.permanent_fail,
        is_running: state.is_running.load(Ordering::Acquire),
    }))
}

#[derive(Debug, Deserialize)]
struct ScrapeListRequest {
    url: String,
    limit: Option<usize>,
}

/// Runs the diff producer inline. Under a saturated gate this can block for
/// minutes; that is the budget working as intended.
async fn scrape_list(
    State(state): State<AppState>,
    Json(request): Json<ScrapeListRequest>,
) -> Result<Json<DiffSummary>, ApiError> {
    if request.url.is_empty() {
        return Err(ApiError::bad_request("url must not be empty"));
    }
    let summary = state.diff.run(&request.url, request.limit).await?;
    Ok(Json(summary))
}

/// Kicks off the scheduler's full URL set immediately, in the background.
/// Bypasses the clock, never the rate budget.
async fn scheduler_run(State(state): State<AppState>) -> Json<serde_json::Value> {
    let diff = state.diff.clone();
    let urls = state.index_urls.clone();
    tokio::spawn(async move {
        for url in urls.iter() {
            match diff.run(url, None).await {
                Ok(summary) => tracing::info!(
                    url = %url,
                    urls_found = summary.urls_found,
                    new_to_queue = summary.new_to_queue,
                    "manual scheduler run finished url"
                ),
                Err(e) => tracing::error!(url = %url, error = %e, "manual scheduler run failed"),
            }
        }
    });
    Json(serde_json::json!({ "status": "running" }))
}

#[derive(Debug, Serialize)]
struct RateLimitStatsResponse {
    per_window_used: usize,
    per_window_limit: usize,
    cooldown_until_epoch: Option<i64>,
    worker_admissions: u64,
    diff_admissions: u64,
}

async fn ratelimit_stats(State(state): State<AppState>) -> Json<RateLimitStatsResponse> {
    let stats = state.gate.stats();
    Json(RateLimitStatsResponse {
        per_window_used: stats.per_window_used,
        per_window_limit: stats.per_window_limit,
        cooldown_until_epoch: stats.cooldown_until.map(|t| t.timestamp()),
        worker_admissions: stats.worker_admissions,
        diff_admissions: stats.diff_admissions,
    })
}

async fn healthz() -> &'static str {
    "ok"
}
