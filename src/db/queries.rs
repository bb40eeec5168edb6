use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::id;
use crate::models::*;

use super::from_row::{
    NOTIFICATION_COLS, ORDER_COLS, PAYMENT_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Orders ============

pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let order_number = id::new_order_number();
    let now = now();
    let email = input.customer_email.trim().to_lowercase();
    let currency = input.currency.trim().to_lowercase();

    conn.execute(
        "INSERT INTO orders (order_number, customer_name, customer_email, amount_cents,
                             currency, status, payment_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 'pending', ?6, ?7)",
        params![&order_number, &input.customer_name, &email, input.amount_cents, &currency, now, now],
    )?;

    Ok(Order {
        order_number,
        customer_name: input.customer_name.clone(),
        customer_email: email,
        amount_cents: input.amount_cents,
        currency,
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_id: None,
        created_at: now,
        updated_at: now,
        abandoned_at: None,
    })
}

pub fn get_order(conn: &Connection, order_number: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE order_number = ?1", ORDER_COLS),
        &[&order_number],
    )
}

/// Engine-only write of the canonical payment state. `status` is the full
/// next fulfillment state, already computed under the per-order lock.
pub fn update_order_payment_state(
    conn: &Connection,
    order_number: &str,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE orders
         SET status = ?2, payment_status = ?3, payment_id = COALESCE(?4, payment_id), updated_at = ?5
         WHERE order_number = ?1",
        params![order_number, status.as_str(), payment_status.as_str(), payment_id, now()],
    )?;
    Ok(())
}

/// Stamp `abandoned_at`, once. Returns false if it was already set.
pub fn mark_order_abandoned(conn: &Connection, order_number: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE orders SET abandoned_at = ?2 WHERE order_number = ?1 AND abandoned_at IS NULL",
        params![order_number, now()],
    )?;
    Ok(changed > 0)
}

// ============ Payments ============

/// Fields of a payment sighting to persist. Missing optional fields never
/// erase previously stored values (gateways omit fields between sightings).
#[derive(Debug, Clone)]
pub struct PaymentWrite<'a> {
    pub id: &'a str,
    pub order_number: &'a str,
    pub status: GatewayStatus,
    pub status_detail: Option<&'a str>,
    pub method: Option<&'a str>,
    pub source: UpdateSource,
    pub date_created: Option<i64>,
    pub date_approved: Option<i64>,
}

/// Idempotent merge by gateway payment id: insert on first sighting,
/// update on every subsequent one. `date_created` is kept from the first
/// sighting.
pub fn upsert_payment(conn: &Connection, write: &PaymentWrite) -> Result<()> {
    conn.execute(
        "INSERT INTO payments (id, order_number, status, status_detail, method,
                               source_verified, date_created, date_approved)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             status = excluded.status,
             status_detail = COALESCE(excluded.status_detail, payments.status_detail),
             method = COALESCE(excluded.method, payments.method),
             source_verified = excluded.source_verified,
             date_approved = COALESCE(excluded.date_approved, payments.date_approved)",
        params![
            write.id,
            write.order_number,
            write.status.as_str(),
            write.status_detail,
            write.method,
            write.source.as_str(),
            write.date_created.unwrap_or_else(now),
            write.date_approved,
        ],
    )?;
    Ok(())
}

pub fn get_payment(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

pub fn latest_payment_for_order(conn: &Connection, order_number: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE order_number = ?1
             ORDER BY date_created DESC, id DESC LIMIT 1",
            PAYMENT_COLS
        ),
        &[&order_number],
    )
}

pub fn list_payments_for_order(conn: &Connection, order_number: &str) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE order_number = ?1 ORDER BY date_created",
            PAYMENT_COLS
        ),
        &[&order_number],
    )
}

// ============ Sweep candidates ============

/// Orders that never saw a payment and have been pending since before
/// `cutoff` (unix seconds), not yet marked abandoned.
pub fn abandoned_order_candidates(conn: &Connection, cutoff: i64) -> Result<Vec<Order>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM orders o
             WHERE o.payment_status = 'pending'
               AND o.abandoned_at IS NULL
               AND o.created_at < ?1
               AND NOT EXISTS (SELECT 1 FROM payments p WHERE p.order_number = o.order_number)
             ORDER BY o.created_at",
            ORDER_COLS
        ),
        &[&cutoff],
    )
}

/// Payments still pending at the gateway whose order is also still pending.
/// Per-method age thresholds are applied by the sweeper, not here.
pub fn pending_payment_candidates(conn: &Connection) -> Result<Vec<Payment>> {
    query_all(
        conn,
        "SELECT p.id, p.order_number, p.status, p.status_detail, p.method,
                p.source_verified, p.date_created, p.date_approved
         FROM payments p
         JOIN orders o ON o.order_number = p.order_number
         WHERE p.status = 'pending' AND o.payment_status = 'pending'
         ORDER BY p.date_created",
        &[],
    )
}

// ============ Notification ledger ============

/// Atomically claim the (order, outcome) key. Returns false when a record
/// (sent or in flight) already exists.
pub fn claim_notification(conn: &Connection, order_number: &str, outcome: Outcome) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO notifications (order_number, outcome, sent_at, delivery_result, claimed_at)
         VALUES (?1, ?2, NULL, 'in_flight', ?3)",
        params![order_number, outcome.as_str(), now()],
    )?;
    Ok(inserted > 0)
}

/// Commit a claim after confirmed delivery.
pub fn confirm_notification(
    conn: &Connection,
    order_number: &str,
    outcome: Outcome,
    delivery_result: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE notifications SET sent_at = ?3, delivery_result = ?4
         WHERE order_number = ?1 AND outcome = ?2",
        params![order_number, outcome.as_str(), now(), delivery_result],
    )?;
    Ok(())
}

/// Release an unconfirmed claim so a later attempt can retry. A confirmed
/// record is never released.
pub fn release_notification_claim(
    conn: &Connection,
    order_number: &str,
    outcome: Outcome,
) -> Result<()> {
    conn.execute(
        "DELETE FROM notifications
         WHERE order_number = ?1 AND outcome = ?2 AND sent_at IS NULL",
        params![order_number, outcome.as_str()],
    )?;
    Ok(())
}

pub fn get_notification(
    conn: &Connection,
    order_number: &str,
    outcome: Outcome,
) -> Result<Option<NotificationRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM notifications WHERE order_number = ?1 AND outcome = ?2",
            NOTIFICATION_COLS
        ),
        &[&order_number, &outcome.as_str()],
    )
}

/// Drop in-flight claims older than `cutoff` (a crash mid-delivery must not
/// suppress the notification forever).
pub fn release_stale_notification_claims(conn: &Connection, cutoff: i64) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM notifications WHERE sent_at IS NULL AND claimed_at < ?1",
        params![cutoff],
    )?;
    Ok(removed)
}
