use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::db::AppState;
use crate::error::Result;
use crate::poller::{self, Freshness, VerifyOutcome};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payment-status/{payment_id}", get(payment_status))
        .route("/verify-payment/{order_number}", post(verify_payment))
}

/// Customer-facing status check by gateway payment id. Prefers the payment
/// store; only calls the gateway when no terminal snapshot is stored yet.
pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<VerifyOutcome>> {
    let outcome = poller::verify_payment(&state, &payment_id, Freshness::PreferStore).await?;
    Ok(Json(outcome))
}

/// Force a fresh gateway verification of an order's most recent payment.
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<VerifyOutcome>> {
    let outcome = poller::verify_order(&state, &order_number).await?;
    Ok(Json(outcome))
}
