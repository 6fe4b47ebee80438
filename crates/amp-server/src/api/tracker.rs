//! Operator endpoints for the engagement-metrics tracker.

use axum::{extract::State, response::IntoResponse, Extension, Json};
use serde::Deserialize;

use super::{ApiResponse, AppState, ResponseMeta};
use crate::middleware::RequestId;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct RunRequest {
    /// Restrict the run to one region; omit to sweep every region.
    region: Option<String>,
    /// Bypass the 24-hour region-freshness skip.
    force: bool,
    /// Bypass an active rate-limit backoff window.
    ignore_rate_limit: bool,
}

/// `GET /api/v1/tracker/status`
pub(super) async fn tracker_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let snapshot = state.tracker.status().await;
    Json(ApiResponse {
        data: snapshot,
        meta: ResponseMeta::new(req_id.0),
    })
}

/// `POST /api/v1/tracker/run`
///
/// Triggers a batch immediately and responds with its summary. A trigger
/// that arrives while another batch is running is dropped and reported
/// with a zeroed summary.
pub(super) async fn trigger_run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Option<Json<RunRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    tracing::info!(
        region = req.region.as_deref(),
        force = req.force,
        ignore_rate_limit = req.ignore_rate_limit,
        "tracker: manual run requested"
    );

    let summary = state
        .tracker
        .trigger_manual(req.region, req.force, req.ignore_rate_limit)
        .await;
    Json(ApiResponse {
        data: summary,
        meta: ResponseMeta::new(req_id.0),
    })
}
