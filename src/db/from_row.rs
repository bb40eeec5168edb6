//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupted data.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const ORDER_COLS: &str = "order_number, customer_name, customer_email, amount_cents, \
     currency, status, payment_status, payment_id, created_at, updated_at, abandoned_at";

pub const PAYMENT_COLS: &str =
    "id, order_number, status, status_detail, method, source_verified, date_created, date_approved";

pub const NOTIFICATION_COLS: &str = "order_number, outcome, sent_at, delivery_result";

// ============ FromRow Implementations ============

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            order_number: row.get(0)?,
            customer_name: row.get(1)?,
            customer_email: row.get(2)?,
            amount_cents: row.get(3)?,
            currency: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            payment_status: parse_enum(row, 6, "payment_status")?,
            payment_id: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            abandoned_at: row.get(10)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            order_number: row.get(1)?,
            status: parse_enum(row, 2, "status")?,
            status_detail: row.get(3)?,
            method: row.get(4)?,
            source_verified: parse_enum(row, 5, "source_verified")?,
            date_created: row.get(6)?,
            date_approved: row.get(7)?,
        })
    }
}

impl FromRow for NotificationRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(NotificationRecord {
            order_number: row.get(0)?,
            outcome: parse_enum(row, 1, "outcome")?,
            sent_at: row.get(2)?,
            delivery_result: row.get(3)?,
        })
    }
}
