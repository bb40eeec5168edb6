//! On-demand payment status verification against the gateway.
//!
//! Used by the customer-facing "check my payment" endpoints and by the
//! sweeper's last-chance checks. The poller itself is a stateless
//! pass-through per call; retry pacing lives in [`BackoffConfig`] owned by
//! the caller's configuration.

use serde::Serialize;

use crate::config::BackoffConfig;
use crate::db::{AppState, queries};
use crate::engine::{CanonicalState, PaymentUpdate};
use crate::error::{AppError, Result};
use crate::gateway::{GatewayResult, PaymentGateway, PaymentSnapshot};
use crate::models::UpdateSource;

/// Whether a verification may answer from the payment store alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Answer from the store when it already holds a terminal snapshot.
    PreferStore,
    /// Always make a fresh gateway call.
    ForceGateway,
}

/// Outcome of a verification request. `Inconclusive` means the gateway could
/// not be reached conclusively; it is deliberately distinct from a failed
/// payment and must never be shown to a customer as one.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// Canonical state is terminal.
    Settled { state: CanonicalState },
    /// Payment is still in flight.
    Pending { state: CanonicalState },
    /// Verification could not complete; status unknown.
    Inconclusive,
}

impl VerifyOutcome {
    fn from_state(state: CanonicalState) -> Self {
        if state.payment_status.is_terminal() {
            Self::Settled { state }
        } else {
            Self::Pending { state }
        }
    }
}

/// Fetch a payment snapshot, retrying transient errors with capped
/// exponential backoff. Bounded: at most `backoff.max_attempts` calls.
pub async fn fetch_with_backoff(
    gateway: &dyn PaymentGateway,
    payment_id: &str,
    backoff: &BackoffConfig,
) -> GatewayResult<PaymentSnapshot> {
    let attempts = backoff.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match gateway.fetch_status(payment_id).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = backoff.delay(attempt);
                tracing::debug!(
                    "Transient gateway error fetching {} (attempt {}/{}), retrying in {:?}: {}",
                    payment_id,
                    attempt,
                    attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Verify a payment by gateway id.
pub async fn verify_payment(
    state: &AppState,
    payment_id: &str,
    freshness: Freshness,
) -> Result<VerifyOutcome> {
    let stored = {
        let conn = state.db.get()?;
        queries::get_payment(&conn, payment_id)?
    };

    // A terminal snapshot in the store answers immediately; no redundant
    // external call.
    if freshness == Freshness::PreferStore {
        if let Some(payment) = &stored {
            if payment.status.is_terminal() {
                let conn = state.db.get()?;
                let order = queries::get_order(&conn, &payment.order_number)?.ok_or_else(|| {
                    AppError::Internal(format!(
                        "Payment {} references missing order {}",
                        payment.id, payment.order_number
                    ))
                })?;
                return Ok(VerifyOutcome::from_state(CanonicalState::from(&order)));
            }
        }
    }

    let snapshot = match fetch_with_backoff(state.gateway.as_ref(), payment_id, &state.backoff).await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!("Verification inconclusive for payment {}: {}", payment_id, e);
            return Ok(VerifyOutcome::Inconclusive);
        }
    };

    // Resolve the order: the gateway's external reference, or what the store
    // already knows about this payment.
    let order_number = snapshot
        .order_number
        .clone()
        .or_else(|| stored.as_ref().map(|p| p.order_number.clone()));
    let Some(order_number) = order_number else {
        tracing::warn!(
            "Gateway snapshot for payment {} carries no order reference",
            payment_id
        );
        return Ok(VerifyOutcome::Inconclusive);
    };

    let canonical = state
        .engine
        .apply(PaymentUpdate::from_snapshot(
            order_number,
            &snapshot,
            UpdateSource::Polled,
        ))
        .await?;

    Ok(VerifyOutcome::from_state(canonical))
}

/// Verify an order's most recent payment with a fresh gateway call.
pub async fn verify_order(state: &AppState, order_number: &str) -> Result<VerifyOutcome> {
    let (order, payment) = {
        let conn = state.db.get()?;
        let Some(order) = queries::get_order(&conn, order_number)? else {
            return Err(AppError::NotFound(format!("Order {} not found", order_number)));
        };
        let payment = queries::latest_payment_for_order(&conn, order_number)?;
        (order, payment)
    };

    match payment {
        Some(payment) => verify_payment(state, &payment.id, Freshness::ForceGateway).await,
        // Nothing to verify against the gateway yet; report the stored state.
        None => Ok(VerifyOutcome::from_state(CanonicalState::from(&order))),
    }
}
