//! Customer status notifications.
//!
//! Supports three delivery modes:
//! 1. Send an email via the Resend API (default when an API key is set)
//! 2. POST to a webhook URL (for DIY delivery)
//! 3. Disabled (log only)
//!
//! Delivery is gated by [`NotificationGate`], which guarantees at most one
//! confirmed delivery per (order, outcome) pair across restarts and across
//! concurrent producers. The ledger row is only committed on confirmed
//! delivery; a failed send releases the claim so a later attempt can retry.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::NotifyConfig;
use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};
use crate::models::{Order, Outcome};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// What the customer is told about their order.
#[derive(Debug, Clone, Serialize)]
pub struct StatusNotification {
    pub order_number: String,
    pub outcome: Outcome,
    pub customer_name: String,
    pub customer_email: String,
    pub amount_cents: i64,
    pub currency: String,
}

impl StatusNotification {
    pub fn for_order(order: &Order, outcome: Outcome) -> Self {
        Self {
            order_number: order.order_number.clone(),
            outcome,
            customer_name: order.customer_name.clone(),
            customer_email: order.customer_email.clone(),
            amount_cents: order.amount_cents,
            currency: order.currency.clone(),
        }
    }

    fn subject(&self) -> String {
        let what = match self.outcome {
            Outcome::Pending => "we are waiting for your payment confirmation",
            Outcome::Approved => "your payment was received",
            Outcome::Rejected => "your payment could not be processed",
            Outcome::Cancelled => "your payment was cancelled",
            Outcome::Refunded => "your payment was refunded",
        };
        format!("Order {}: {}", self.order_number, what)
    }

    fn body_text(&self) -> String {
        format!(
            "Hi {},\n\nOrder {} ({} {:.2}): {}.\n",
            self.customer_name,
            self.order_number,
            self.currency.to_uppercase(),
            self.amount_cents as f64 / 100.0,
            self.subject(),
        )
    }
}

/// Result of a tryNotify call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyStatus {
    /// Delivery confirmed and recorded in the ledger.
    Sent,
    /// A record for this (order, outcome) already exists; nothing was sent.
    Skipped,
    /// Delivery failed; no record was left behind.
    Failed,
}

/// Injected delivery channel. Returns a short channel tag recorded in the
/// ledger on success.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, note: &StatusNotification) -> Result<&'static str>;
}

/// Email delivery via the Resend API.
pub struct ResendNotifier {
    client: Client,
    api_key: String,
    from_email: String,
}

impl ResendNotifier {
    pub fn new(api_key: String, from_email: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            from_email,
        }
    }
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
}

#[async_trait]
impl NotificationSender for ResendNotifier {
    async fn send(&self, note: &StatusNotification) -> Result<&'static str> {
        let request = ResendRequest {
            from: &self.from_email,
            to: vec![&note.customer_email],
            subject: note.subject(),
            text: note.body_text(),
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Resend API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Resend API returned {}: {}",
                status, body
            )));
        }

        Ok("resend")
    }
}

/// POST the notification JSON to a configured URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, note: &StatusNotification) -> Result<&'static str> {
        let response = self
            .client
            .post(&self.url)
            .json(note)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Notification webhook error: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Notification webhook returned {}",
                response.status()
            )));
        }

        Ok("webhook")
    }
}

/// No delivery configured; log and treat as delivered.
pub struct DisabledNotifier;

#[async_trait]
impl NotificationSender for DisabledNotifier {
    async fn send(&self, note: &StatusNotification) -> Result<&'static str> {
        tracing::info!(
            "Notification delivery disabled: order={} outcome={}",
            note.order_number,
            note.outcome
        );
        Ok("disabled")
    }
}

/// Pick the delivery channel from configuration, the same precedence the
/// rest of the stack uses: Resend key, then webhook URL, then disabled.
pub fn sender_from_config(config: &NotifyConfig) -> Arc<dyn NotificationSender> {
    if let Some(key) = &config.resend_api_key {
        Arc::new(ResendNotifier::new(key.clone(), config.from_email.clone()))
    } else if let Some(url) = &config.webhook_url {
        Arc::new(WebhookNotifier::new(url.clone()))
    } else {
        Arc::new(DisabledNotifier)
    }
}

/// At-most-once gate in front of the delivery channel.
pub struct NotificationGate {
    db: DbPool,
    sender: Arc<dyn NotificationSender>,
}

impl NotificationGate {
    pub fn new(db: DbPool, sender: Arc<dyn NotificationSender>) -> Self {
        Self { db, sender }
    }

    /// Check-and-insert the (order, outcome) key, then deliver. The key is
    /// committed only on confirmed delivery; a failed send releases the
    /// claim and leaves no record behind.
    pub async fn try_notify(&self, order: &Order, outcome: Outcome) -> Result<NotifyStatus> {
        {
            let conn = self.db.get()?;
            if !queries::claim_notification(&conn, &order.order_number, outcome)? {
                return Ok(NotifyStatus::Skipped);
            }
        }

        let note = StatusNotification::for_order(order, outcome);
        match self.sender.send(&note).await {
            Ok(channel) => {
                let conn = self.db.get()?;
                queries::confirm_notification(&conn, &order.order_number, outcome, channel)?;
                Ok(NotifyStatus::Sent)
            }
            Err(e) => {
                tracing::warn!(
                    "Notification delivery failed for order {} outcome {}: {}",
                    order.order_number,
                    outcome,
                    e
                );
                let conn = self.db.get()?;
                queries::release_notification_claim(&conn, &order.order_number, outcome)?;
                Ok(NotifyStatus::Failed)
            }
        }
    }
}
