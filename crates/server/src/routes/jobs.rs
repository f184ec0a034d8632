// crates/server/src/routes/jobs.rs
//! Job submission and polling endpoints.
//!
//! - POST /start — Launch a mining job for an applicant profile
//! - POST /status — Pop the next progress line and report completion

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use loanminer_jobs::{ApplicantFields, JobId, PollUpdate};

use crate::error::ApiResult;
use crate::state::AppState;

/// Response for POST /start.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct StartResponse {
    pub id: JobId,
}

/// Request body for POST /status.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct StatusRequest {
    pub id: JobId,
}

/// POST /start — Spawn a mining process fed with the eight applicant fields.
///
/// Returns the job id the client must use for subsequent /status polls.
async fn start_job(
    State(state): State<Arc<AppState>>,
    Json(fields): Json<ApplicantFields>,
) -> ApiResult<Json<StartResponse>> {
    let id = state.jobs.launch(&fields).await?;
    Ok(Json(StartResponse { id }))
}

/// POST /status — One poll against the job's output buffer.
///
/// Each call returns at most one buffered line; clients poll repeatedly
/// until `completed` is true.
async fn job_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<PollUpdate>> {
    let update = state.jobs.poll(&req.id)?;
    Ok(Json(update))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(start_job))
        .route("/status", post(job_status))
}
