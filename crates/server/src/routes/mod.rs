//! API route handlers for the loanminer server.

pub mod health;
pub mod jobs;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router.
///
/// Routes:
/// - POST /start - Launch a mining job, returns its id
/// - POST /status - Poll a job for the next progress line
/// - GET /api/health - Health check
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(jobs::router())
        .nest("/api", health::router())
        .with_state(state)
}
