use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::gateway::IntentRequest;
use crate::id;
use crate::models::{CreateOrder, Order};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/{order_number}", get(get_order))
        .route("/orders/{order_number}/checkout", post(checkout_order))
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    /// Gateway redirect URL; absent when the gateway was unavailable at
    /// creation time (retry via the checkout route).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

/// Create an order and ask the gateway for a checkout redirect.
///
/// A gateway failure does not roll the order back; the customer can retry
/// the redirect through `POST /orders/{order_number}/checkout`.
pub async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<CreateOrder>,
) -> Result<Json<OrderResponse>> {
    if input.customer_name.trim().is_empty() {
        return Err(AppError::BadRequest("customer_name is required".into()));
    }
    if input.customer_email.trim().is_empty() || !input.customer_email.contains('@') {
        return Err(AppError::BadRequest("a valid customer_email is required".into()));
    }
    if input.amount_cents <= 0 {
        return Err(AppError::BadRequest("amount_cents must be positive".into()));
    }

    let order = {
        let conn = state.db.get()?;
        queries::create_order(&conn, &input)?
    };

    let checkout_url = match request_intent(&state, &order).await {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(
                "Checkout intent failed for new order {}: {}",
                order.order_number,
                e
            );
            None
        }
    };

    Ok(Json(OrderResponse { order, checkout_url }))
}

/// Re-request a checkout redirect for an existing order.
///
/// The gateway does not guarantee intent idempotency per order, so stored
/// state is always checked first: a terminally settled order never triggers
/// another intent.
pub async fn checkout_order(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderResponse>> {
    if !id::is_valid_order_number(&order_number) {
        return Err(AppError::BadRequest("invalid order number".into()));
    }

    let order = {
        let conn = state.db.get()?;
        queries::get_order(&conn, &order_number)?
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_number)))?
    };

    if order.payment_status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Order {} payment is already {}",
            order.order_number, order.payment_status
        )));
    }

    let checkout_url = request_intent(&state, &order).await?;
    Ok(Json(OrderResponse {
        order,
        checkout_url: Some(checkout_url),
    }))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<Order>> {
    let conn = state.db.get()?;
    let order = queries::get_order(&conn, &order_number)?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_number)))?;
    Ok(Json(order))
}

async fn request_intent(state: &AppState, order: &Order) -> Result<String> {
    let request = IntentRequest {
        order_number: order.order_number.clone(),
        amount_cents: order.amount_cents,
        currency: order.currency.clone(),
        customer_name: order.customer_name.clone(),
        customer_email: order.customer_email.clone(),
        return_url: format!("{}/orders/{}", state.base_url, order.order_number),
    };
    let intent = state.gateway.create_intent(&request).await?;
    tracing::info!(
        "Created checkout intent {} for order {}",
        intent.intent_id,
        order.order_number
    );
    Ok(intent.checkout_url)
}
