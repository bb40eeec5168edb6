//! Payment gateway webhook ingestion.
//!
//! The push payload is only a "something changed, go check" trigger: the
//! authoritative snapshot always comes from a fresh `fetch_status` call,
//! because gateways omit fields and deliver out of order. Once the payload
//! is structurally valid the endpoint always acknowledges with 200 - a
//! non-2xx answer would put the gateway's notifier into a retry storm, and
//! anything we drop here is caught later by the timeout sweeper.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::db::{AppState, queries};
use crate::engine::PaymentUpdate;
use crate::models::UpdateSource;

type HmacSha256 = Hmac<Sha256>;

/// Payment-lifecycle event types we act on. Everything else is acknowledged
/// and discarded; unknown events are not errors.
const RECOGNIZED_EVENTS: &[&str] = &["payment", "payment.created", "payment.updated"];

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payments", post(handle_payment_webhook))
}

/// Notification envelope. Providers spell the fields differently; anything
/// beyond the event type and payment id is ignored.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(alias = "type", alias = "eventType")]
    event_type: Option<String>,
    #[serde(alias = "paymentId")]
    payment_id: Option<Value>,
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    id: Option<Value>,
}

impl WebhookEnvelope {
    fn resolve_payment_id(&self) -> Option<String> {
        let raw = self
            .payment_id
            .as_ref()
            .or_else(|| self.data.as_ref().and_then(|d| d.id.as_ref()))?;
        match raw {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Verify the `x-signature` header (`ts=...,v1=...`) over the raw body.
/// Constant-time comparison; any malformed part fails verification.
fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let Some(header) = headers.get("x-signature").and_then(|v| v.to_str().ok()) else {
        return false;
    };

    let mut timestamp = None;
    let mut sig_v1 = None;
    for part in header.split(',') {
        if let Some(t) = part.trim().strip_prefix("ts=") {
            timestamp = Some(t);
        } else if let Some(s) = part.trim().strip_prefix("v1=") {
            sig_v1 = Some(s);
        }
    }
    let (Some(timestamp), Some(sig_v1)) = (timestamp, sig_v1) else {
        return false;
    };

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(body));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_v1.as_bytes();
    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }
    expected_bytes.ct_eq(provided_bytes).into()
}

pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!("Malformed webhook payload: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let Some(event_type) = envelope.event_type.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing event type");
    };
    let Some(payment_id) = envelope.resolve_payment_id() else {
        return (StatusCode::BAD_REQUEST, "Missing payment id");
    };

    // From here on the payload is structurally valid: always acknowledge.
    if let Some(secret) = &state.webhook_secret {
        if !verify_signature(secret, &headers, &body) {
            tracing::warn!(
                "Webhook signature verification failed for payment {}",
                payment_id
            );
            return (StatusCode::OK, "Ignored");
        }
    }

    if !RECOGNIZED_EVENTS.contains(&event_type) {
        tracing::debug!("Ignoring webhook event type {:?}", event_type);
        return (StatusCode::OK, "Event ignored");
    }

    // The payload told us to go look; the gateway tells us what happened.
    let snapshot = match state.gateway.fetch_status(&payment_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(
                "Webhook for payment {} could not be verified against gateway: {}",
                payment_id,
                e
            );
            return (StatusCode::OK, "Acknowledged");
        }
    };

    let order_number = match &snapshot.order_number {
        Some(n) => n.clone(),
        None => {
            // Partial gateway read; fall back to what the store knows.
            let stored = state
                .db
                .get()
                .ok()
                .and_then(|conn| queries::get_payment(&conn, &payment_id).ok().flatten());
            match stored {
                Some(payment) => payment.order_number,
                None => {
                    tracing::warn!(
                        "Webhook payment {} has no order reference, dropping",
                        payment_id
                    );
                    return (StatusCode::OK, "Acknowledged");
                }
            }
        }
    };

    let update = PaymentUpdate::from_snapshot(order_number, &snapshot, UpdateSource::Webhook);
    if let Err(e) = state.engine.apply(update).await {
        tracing::error!("Webhook apply failed for payment {}: {}", payment_id, e);
        return (StatusCode::OK, "Acknowledged");
    }

    (StatusCode::OK, "OK")
}
