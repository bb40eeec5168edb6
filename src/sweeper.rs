//! Timeout sweeper: expires stale pending orders and payments.
//!
//! Runs on a single recurring timer (plus a manual trigger for operational
//! recovery). Each cycle enumerates candidate rows and processes them
//! sequentially, so the gateway never sees a burst of self-inflicted load.
//! Every per-row failure is isolated; one bad row never aborts the cycle.

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::db::{AppState, queries};
use crate::engine::PaymentUpdate;
use crate::error::Result;
use crate::models::{GatewayStatus, UpdateSource};

/// Status detail stamped on orders that expired with no payment at all.
pub const DETAIL_ABANDONED: &str = "abandoned_no_payment";
/// Status detail stamped on payments force-failed past their threshold.
pub const DETAIL_EXPIRED: &str = "expired_by_timeout";

/// In-flight notification claims older than this are released so a crash
/// mid-delivery cannot suppress a notification forever.
const STALE_CLAIM_SECS: i64 = 15 * 60;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SweepReport {
    /// Orders force-failed because no payment ever appeared.
    pub abandoned: usize,
    /// Pending payments force-failed past their per-method threshold.
    pub expired: usize,
    /// Payments rescued by the last-chance gateway check.
    pub rescued: usize,
    /// Stale notification claims released.
    pub released_claims: usize,
    /// Rows whose processing failed (logged, skipped).
    pub errors: usize,
}

/// One full sweep: abandoned orders, expired pending payments, stale claims.
/// Safe to run redundantly; already-terminal rows are no-ops.
pub async fn run_cycle(state: &AppState) -> Result<SweepReport> {
    let now = Utc::now().timestamp();
    let mut report = SweepReport::default();

    sweep_abandoned_orders(state, now, &mut report).await?;
    sweep_expired_payments(state, now, &mut report).await?;

    let conn = state.db.get()?;
    report.released_claims =
        queries::release_stale_notification_claims(&conn, now - STALE_CLAIM_SECS)?;

    tracing::info!(
        "Sweep done: abandoned={} expired={} rescued={} released_claims={} errors={}",
        report.abandoned,
        report.expired,
        report.rescued,
        report.released_claims,
        report.errors
    );
    Ok(report)
}

/// Orders with no payment at all, pending past the abandonment threshold:
/// force-fail through the engine and stamp `abandoned_at` once.
async fn sweep_abandoned_orders(
    state: &AppState,
    now: i64,
    report: &mut SweepReport,
) -> Result<()> {
    let cutoff = now - state.sweep.abandoned_after.as_secs() as i64;
    let candidates = {
        let conn = state.db.get()?;
        queries::abandoned_order_candidates(&conn, cutoff)?
    };

    for order in candidates {
        let update =
            PaymentUpdate::swept_rejection(order.order_number.clone(), None, DETAIL_ABANDONED);
        match state.engine.apply(update).await {
            Ok(_) => {
                let conn = state.db.get()?;
                if queries::mark_order_abandoned(&conn, &order.order_number)? {
                    report.abandoned += 1;
                }
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!("Failed to sweep abandoned order {}: {}", order.order_number, e);
            }
        }
    }
    Ok(())
}

/// Pending payments older than their per-method threshold: one last gateway
/// check, then either the gateway's terminal answer or a forced rejection.
async fn sweep_expired_payments(
    state: &AppState,
    now: i64,
    report: &mut SweepReport,
) -> Result<()> {
    let candidates = {
        let conn = state.db.get()?;
        queries::pending_payment_candidates(&conn)?
    };

    for payment in candidates {
        let threshold = state.sweep.pending_threshold(payment.method.as_deref());
        if now - payment.date_created < threshold.as_secs() as i64 {
            continue;
        }

        // Last-chance check: a slow-but-succeeding payment must not be
        // turned into a false failure.
        let (update, rescued) = match state.gateway.fetch_status(&payment.id).await {
            Ok(snapshot) if GatewayStatus::from_gateway(&snapshot.status).is_terminal() => (
                PaymentUpdate::from_snapshot(
                    payment.order_number.clone(),
                    &snapshot,
                    UpdateSource::Swept,
                ),
                true,
            ),
            Ok(_) => (
                PaymentUpdate::swept_rejection(
                    payment.order_number.clone(),
                    Some(payment.id.clone()),
                    DETAIL_EXPIRED,
                ),
                false,
            ),
            Err(e) => {
                tracing::warn!(
                    "Last-chance check failed for payment {}, force-failing: {}",
                    payment.id,
                    e
                );
                (
                    PaymentUpdate::swept_rejection(
                        payment.order_number.clone(),
                        Some(payment.id.clone()),
                        DETAIL_EXPIRED,
                    ),
                    false,
                )
            }
        };

        match state.engine.apply(update).await {
            Ok(_) if rescued => report.rescued += 1,
            Ok(_) => report.expired += 1,
            Err(e) => {
                report.errors += 1;
                tracing::error!("Failed to sweep payment {}: {}", payment.id, e);
            }
        }
    }
    Ok(())
}

/// Spawn the recurring sweep task. The first tick fires immediately, which
/// doubles as startup recovery after a crash or deploy.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.sweep.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = run_cycle(&state).await {
                tracing::error!("Sweep cycle failed: {}", e);
            }
        }
    })
}
