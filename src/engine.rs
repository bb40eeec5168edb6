//! Reconciliation engine: the single writer of canonical order/payment state.
//!
//! The webhook ingestor, status poller, and timeout sweeper all funnel their
//! observations through [`Engine::apply`] as [`PaymentUpdate`]s, so every
//! state transition goes through one function, serialized per order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};
use crate::gateway::PaymentSnapshot;
use crate::models::{GatewayStatus, Order, OrderStatus, Outcome, PaymentStatus, UpdateSource};
use crate::notify::{NotificationGate, NotifyStatus};

/// A candidate observation of a payment, from any of the three producers.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub order_number: String,
    /// Gateway payment id. `None` only for synthetic abandonment sweeps,
    /// where no payment ever existed to reference.
    pub payment_id: Option<String>,
    pub status: GatewayStatus,
    pub status_detail: Option<String>,
    pub method: Option<String>,
    pub date_created: Option<i64>,
    pub date_approved: Option<i64>,
    pub source: UpdateSource,
}

impl PaymentUpdate {
    /// Build an update from a gateway snapshot for the given order.
    pub fn from_snapshot(
        order_number: String,
        snapshot: &PaymentSnapshot,
        source: UpdateSource,
    ) -> Self {
        Self {
            order_number,
            payment_id: Some(snapshot.payment_id.clone()),
            status: GatewayStatus::from_gateway(&snapshot.status),
            status_detail: snapshot.status_detail.clone(),
            method: snapshot.method.clone(),
            date_created: snapshot.date_created,
            date_approved: snapshot.date_approved,
            source,
        }
    }

    /// A sweeper-forced rejection (timeout expiry or abandonment).
    pub fn swept_rejection(
        order_number: String,
        payment_id: Option<String>,
        detail: &str,
    ) -> Self {
        Self {
            order_number,
            payment_id,
            status: GatewayStatus::Rejected,
            status_detail: Some(detail.to_string()),
            method: None,
            date_created: None,
            date_approved: None,
            source: UpdateSource::Swept,
        }
    }
}

/// The canonical state of an order after an apply, as recorded in the store.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalState {
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
}

impl From<&Order> for CanonicalState {
    fn from(order: &Order) -> Self {
        Self {
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment_status,
            payment_id: order.payment_id.clone(),
        }
    }
}

/// Per-order mutual exclusion. Cross-order applies run fully parallel;
/// two applies for the same order execute strictly one after the other.
#[derive(Default)]
struct OrderLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OrderLocks {
    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().expect("order lock map poisoned");
            if map.len() > 1024 {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

pub struct Engine {
    db: DbPool,
    gate: Arc<NotificationGate>,
    locks: OrderLocks,
}

impl Engine {
    pub fn new(db: DbPool, gate: Arc<NotificationGate>) -> Self {
        Self {
            db,
            gate,
            locks: OrderLocks::default(),
        }
    }

    /// Apply a candidate update and return the resulting canonical state.
    ///
    /// Retries exactly once when the store reports lock contention.
    pub async fn apply(&self, update: PaymentUpdate) -> Result<CanonicalState> {
        match self.apply_once(&update).await {
            Err(e) if e.is_store_conflict() => {
                tracing::warn!(
                    "Store conflict applying update for order {}, retrying once",
                    update.order_number
                );
                self.apply_once(&update).await
            }
            other => other,
        }
    }

    async fn apply_once(&self, update: &PaymentUpdate) -> Result<CanonicalState> {
        // The lock covers only the store transaction. Gateway calls happen in
        // the producers before apply; notification delivery happens after.
        let (order, outcome) = {
            let _guard = self.locks.acquire(&update.order_number).await;
            self.transition(update)?
        };

        if let Some(outcome) = outcome {
            match self.gate.try_notify(&order, outcome).await {
                Ok(NotifyStatus::Sent) => {
                    tracing::info!(
                        "Notified customer: order={} outcome={}",
                        order.order_number,
                        outcome
                    );
                }
                Ok(NotifyStatus::Skipped) => {}
                Ok(NotifyStatus::Failed) => {
                    tracing::warn!(
                        "Notification not delivered: order={} outcome={}",
                        order.order_number,
                        outcome
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Notification gate error for order {}: {}",
                        order.order_number,
                        e
                    );
                }
            }
        }

        Ok(CanonicalState::from(&order))
    }

    /// The state transition itself, in one store transaction.
    fn transition(&self, update: &PaymentUpdate) -> Result<(Order, Option<Outcome>)> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction()?;

        let Some(order) = queries::get_order(&tx, &update.order_number)? else {
            return Err(AppError::NotFound(format!(
                "Order {} not found",
                update.order_number
            )));
        };

        // Terminal states are write-once: the candidate is ignored. The
        // notification request is still re-issued when the candidate maps to
        // the stored outcome, so an earlier failed delivery can be retried by
        // a later idempotent sighting (the gate makes it at most once).
        if order.payment_status.is_terminal() {
            let retry_outcome = match (order.payment_status, update.status) {
                (PaymentStatus::Paid, GatewayStatus::Approved) => Some(Outcome::Approved),
                (PaymentStatus::Failed, GatewayStatus::Rejected) => Some(Outcome::Rejected),
                (PaymentStatus::Failed, GatewayStatus::Cancelled) => Some(Outcome::Cancelled),
                _ => None,
            };
            tx.commit()?;
            tracing::debug!(
                "Ignoring {} update for order {}: payment_status already {}",
                update.source,
                order.order_number,
                order.payment_status
            );
            return Ok((order, retry_outcome));
        }

        if let Some(payment_id) = &update.payment_id {
            queries::upsert_payment(
                &tx,
                &queries::PaymentWrite {
                    id: payment_id,
                    order_number: &update.order_number,
                    status: update.status,
                    status_detail: update.status_detail.as_deref(),
                    method: update.method.as_deref(),
                    source: update.source,
                    date_created: update.date_created,
                    date_approved: update.date_approved,
                },
            )?;
        }

        let payment_status = match update.status {
            GatewayStatus::Approved => PaymentStatus::Paid,
            GatewayStatus::Rejected | GatewayStatus::Cancelled => PaymentStatus::Failed,
            GatewayStatus::Pending => PaymentStatus::Pending,
        };

        // A paid order advances to confirmed unless fulfillment already moved
        // it along manually. A failed payment leaves fulfillment untouched.
        let status = if payment_status == PaymentStatus::Paid && order.status == OrderStatus::Pending
        {
            OrderStatus::Confirmed
        } else {
            order.status
        };

        queries::update_order_payment_state(
            &tx,
            &update.order_number,
            status,
            payment_status,
            update.payment_id.as_deref(),
        )?;
        tx.commit()?;

        let prev = order.payment_status;
        let updated = Order {
            status,
            payment_status,
            payment_id: update.payment_id.clone().or(order.payment_id.clone()),
            ..order
        };

        tracing::info!(
            "Applied {} update for order {}: payment_status {} -> {}",
            update.source,
            updated.order_number,
            prev,
            payment_status
        );

        Ok((updated, Some(Outcome::from(update.status))))
    }
}
