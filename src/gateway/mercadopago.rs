use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GatewayConfig;

use super::{GatewayError, GatewayResult, IntentRequest, PaymentGateway, PaymentIntent, PaymentSnapshot};

/// Mercado Pago payments API client (cards + PSE bank debits).
#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl MercadoPagoClient {
    pub fn new(config: &GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        }
    }
}

fn classify_status(status: StatusCode, body: String) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        GatewayError::Transient(format!("HTTP {}: {}", status, body))
    } else {
        GatewayError::Permanent(format!("HTTP {}: {}", status, body))
    }
}

fn classify_reqwest(e: reqwest::Error) -> GatewayError {
    // Network-level failures (timeouts, connection resets) are retryable;
    // anything else at this layer means we built a bad request.
    if e.is_timeout() || e.is_connect() || e.is_request() {
        GatewayError::Transient(e.to_string())
    } else {
        GatewayError::Permanent(e.to_string())
    }
}

fn parse_iso_ts(raw: &Option<String>) -> Option<i64> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
}

/// The payment resource as returned by GET /v1/payments/{id}. Only the
/// fields the reconciliation flow reads; everything else is ignored.
#[derive(Debug, Deserialize)]
struct MpPayment {
    id: Value,
    status: String,
    status_detail: Option<String>,
    external_reference: Option<String>,
    payment_method_id: Option<String>,
    date_created: Option<String>,
    date_approved: Option<String>,
}

#[derive(Debug, Serialize)]
struct MpPreferenceItem<'a> {
    title: String,
    quantity: u32,
    unit_price: f64,
    currency_id: &'a str,
}

#[derive(Debug, Serialize)]
struct MpPayer<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct MpBackUrls<'a> {
    success: &'a str,
    pending: &'a str,
    failure: &'a str,
}

#[derive(Debug, Serialize)]
struct MpCreatePreference<'a> {
    items: Vec<MpPreferenceItem<'a>>,
    payer: MpPayer<'a>,
    external_reference: &'a str,
    back_urls: MpBackUrls<'a>,
    auto_return: &'a str,
}

#[derive(Debug, Deserialize)]
struct MpPreferenceResponse {
    id: String,
    init_point: String,
}

#[async_trait::async_trait]
impl PaymentGateway for MercadoPagoClient {
    async fn fetch_status(&self, payment_id: &str) -> GatewayResult<PaymentSnapshot> {
        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let payment: MpPayment = response
            .json()
            .await
            .map_err(|e| GatewayError::Permanent(format!("unparseable payment body: {}", e)))?;

        Ok(PaymentSnapshot {
            // The API returns numeric ids; normalize to the string form the
            // store and webhooks use.
            payment_id: match payment.id {
                Value::String(s) => s,
                other => other.to_string(),
            },
            order_number: payment.external_reference,
            status: payment.status,
            status_detail: payment.status_detail,
            method: payment.payment_method_id,
            date_created: parse_iso_ts(&payment.date_created),
            date_approved: parse_iso_ts(&payment.date_approved),
        })
    }

    async fn create_intent(&self, request: &IntentRequest) -> GatewayResult<PaymentIntent> {
        let url = format!("{}/checkout/preferences", self.base_url);
        let currency_id = request.currency.to_uppercase();
        let body = MpCreatePreference {
            items: vec![MpPreferenceItem {
                title: format!("Order {}", request.order_number),
                quantity: 1,
                unit_price: request.amount_cents as f64 / 100.0,
                currency_id: &currency_id,
            }],
            payer: MpPayer {
                name: &request.customer_name,
                email: &request.customer_email,
            },
            external_reference: &request.order_number,
            back_urls: MpBackUrls {
                success: &request.return_url,
                pending: &request.return_url,
                failure: &request.return_url,
            },
            auto_return: "approved",
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let preference: MpPreferenceResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Permanent(format!("unparseable preference body: {}", e)))?;

        Ok(PaymentIntent {
            intent_id: preference.id,
            checkout_url: preference.init_point,
        })
    }
}
