//! Payment gateway capability interface.
//!
//! Concrete processors (card/PSE gateways) implement [`PaymentGateway`]; the
//! rest of the system only sees point-in-time [`PaymentSnapshot`]s and the
//! transient/permanent error split that drives retry decisions.

mod mercadopago;

pub use mercadopago::MercadoPagoClient;

use async_trait::async_trait;
use thiserror::Error;

/// Gateway call failures, classified for retry policy. Only `Transient`
/// errors (timeouts, 5xx, rate limits) are worth retrying.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("transient gateway error: {0}")]
    Transient(String),

    #[error("permanent gateway error: {0}")]
    Permanent(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// A point-in-time status reading for a payment, from the gateway's status
/// API. `status` carries the gateway's raw vocabulary; the reconciliation
/// engine maps it (leniently) to canonical state.
#[derive(Debug, Clone)]
pub struct PaymentSnapshot {
    pub payment_id: String,
    /// The order this payment references (the gateway's external reference).
    /// Gateways may omit it on partial reads.
    pub order_number: Option<String>,
    pub status: String,
    pub status_detail: Option<String>,
    pub method: Option<String>,
    pub date_created: Option<i64>,
    pub date_approved: Option<i64>,
}

/// What `create_intent` needs to build a checkout redirect.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub order_number: String,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_name: String,
    pub customer_email: String,
    /// Where the gateway should send the customer back after paying.
    pub return_url: String,
}

/// A created checkout preference/redirect.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub checkout_url: String,
}

/// Capability interface over the external payment processor.
///
/// `fetch_status` is read-only and safe to call repeatedly. `create_intent`
/// is NOT idempotent per order at the gateway side; callers must check
/// stored state before asking for a second intent for the same order.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn fetch_status(&self, payment_id: &str) -> GatewayResult<PaymentSnapshot>;

    async fn create_intent(&self, request: &IntentRequest) -> GatewayResult<PaymentIntent>;
}
