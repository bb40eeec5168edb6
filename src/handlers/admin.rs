use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::db::AppState;
use crate::error::Result;
use crate::sweeper::{self, SweepReport};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/admin/sweep", post(trigger_sweep))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Manually run one sweep cycle. Operational recovery hatch; the sweep is
/// idempotent, so triggering it alongside the timer is safe.
pub async fn trigger_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>> {
    let report = sweeper::run_cycle(&state).await?;
    Ok(Json(report))
}
