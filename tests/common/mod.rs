//! Test utilities and fixtures for Payflow integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use rusqlite::{Connection, params};
use tempfile::TempDir;

pub use payflow::config::{BackoffConfig, SweepConfig};
pub use payflow::db::{AppState, create_pool, init_db, queries};
pub use payflow::engine::{Engine, PaymentUpdate};
pub use payflow::error::{AppError, Result};
pub use payflow::gateway::{
    GatewayError, GatewayResult, IntentRequest, PaymentGateway, PaymentIntent, PaymentSnapshot,
};
pub use payflow::handlers;
pub use payflow::models::*;
pub use payflow::notify::{NotificationGate, NotificationSender, NotifyStatus, StatusNotification};

/// Create an in-memory test database with schema initialized.
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

// ============ Mock gateway ============

/// A scripted gateway response for one `fetch_status` call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Snapshot(PaymentSnapshot),
    Transient(&'static str),
    Permanent(&'static str),
}

/// Programmable in-memory gateway. Responses are consumed per payment id in
/// order; the last one is sticky and repeats for further calls.
#[derive(Default)]
pub struct MockGateway {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    pub fetch_calls: AtomicUsize,
    pub intent_calls: AtomicUsize,
    pub fail_intent: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, payment_id: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(payment_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    async fn fetch_status(&self, payment_id: &str) -> GatewayResult<PaymentSnapshot> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut map = self.responses.lock().unwrap();
        let Some(queue) = map.get_mut(payment_id) else {
            return Err(GatewayError::Permanent("payment not found".into()));
        };
        let response = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or(Scripted::Permanent("no script"))
        };
        match response {
            Scripted::Snapshot(snapshot) => Ok(snapshot),
            Scripted::Transient(msg) => Err(GatewayError::Transient(msg.into())),
            Scripted::Permanent(msg) => Err(GatewayError::Permanent(msg.into())),
        }
    }

    async fn create_intent(&self, request: &IntentRequest) -> GatewayResult<PaymentIntent> {
        self.intent_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_intent.load(Ordering::SeqCst) {
            return Err(GatewayError::Transient("gateway down".into()));
        }
        Ok(PaymentIntent {
            intent_id: format!("pref-{}", request.order_number),
            checkout_url: format!("https://gateway.test/checkout/{}", request.order_number),
        })
    }
}

/// Build a gateway snapshot with the given raw status.
pub fn snapshot(payment_id: &str, order_number: &str, status: &str) -> PaymentSnapshot {
    PaymentSnapshot {
        payment_id: payment_id.to_string(),
        order_number: Some(order_number.to_string()),
        status: status.to_string(),
        status_detail: None,
        method: Some("credit_card".to_string()),
        date_created: Some(Utc::now().timestamp()),
        date_approved: if status == "approved" {
            Some(Utc::now().timestamp())
        } else {
            None
        },
    }
}

// ============ Recording notifier ============

/// Delivery channel that records every send. `fail_next` makes the next N
/// sends fail without recording.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<StatusNotification>>,
    pub fail_next: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_outcomes(&self, order_number: &str) -> Vec<Outcome> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.order_number == order_number)
            .map(|n| n.outcome)
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, note: &StatusNotification) -> Result<&'static str> {
        let failures = self.fail_next.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_next.store(failures - 1, Ordering::SeqCst);
            return Err(AppError::Internal("scripted delivery failure".into()));
        }
        self.sent.lock().unwrap().push(note.clone());
        Ok("test")
    }
}

// ============ App state ============

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    _tmp: TempDir,
}

/// File-backed pool (WAL) so concurrent writers in race tests share one
/// database, unlike per-connection in-memory databases.
pub fn test_app() -> TestApp {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let db_path = tmp.path().join("payflow_test.db");
    let pool = create_pool(db_path.to_str().unwrap()).expect("Failed to create pool");
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let gateway = Arc::new(MockGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let gate = Arc::new(NotificationGate::new(
        pool.clone(),
        notifier.clone() as Arc<dyn NotificationSender>,
    ));
    let engine = Arc::new(Engine::new(pool.clone(), gate));

    let state = AppState {
        db: pool,
        gateway: gateway.clone() as Arc<dyn PaymentGateway>,
        engine,
        sweep: SweepConfig {
            abandoned_after: Duration::from_secs(30 * 60),
            pending_card_after: Duration::from_secs(20 * 60),
            pending_bank_after: Duration::from_secs(45 * 60),
            interval: Duration::from_secs(3600),
        },
        backoff: BackoffConfig {
            base: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
            max_attempts: 3,
        },
        webhook_secret: None,
        base_url: "http://localhost:3000".to_string(),
    };

    TestApp {
        state,
        gateway,
        notifier,
        _tmp: tmp,
    }
}

/// Router with all endpoints, for `tower::ServiceExt::oneshot` tests.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::orders::router())
        .merge(handlers::status::router())
        .merge(handlers::webhook::router())
        .merge(handlers::admin::router())
        .with_state(state)
}

// ============ Fixtures ============

pub fn create_test_order(state: &AppState, email: &str) -> Order {
    let conn = state.db.get().unwrap();
    let input = CreateOrder {
        customer_name: "Test Customer".to_string(),
        customer_email: email.to_string(),
        amount_cents: 50_000_00,
        currency: "cop".to_string(),
    };
    queries::create_order(&conn, &input).expect("Failed to create test order")
}

/// Age an order's creation time by `secs_ago` seconds.
pub fn backdate_order(state: &AppState, order_number: &str, secs_ago: i64) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE orders SET created_at = ?2 WHERE order_number = ?1",
        params![order_number, Utc::now().timestamp() - secs_ago],
    )
    .unwrap();
}

/// Age a payment's creation time by `secs_ago` seconds.
pub fn backdate_payment(state: &AppState, payment_id: &str, secs_ago: i64) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE payments SET date_created = ?2 WHERE id = ?1",
        params![payment_id, Utc::now().timestamp() - secs_ago],
    )
    .unwrap();
}

/// Set a payment's method (for per-method threshold tests).
pub fn set_payment_method(state: &AppState, payment_id: &str, method: &str) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE payments SET method = ?2 WHERE id = ?1",
        params![payment_id, method],
    )
    .unwrap();
}

/// Move an order's fulfillment status directly (back-office simulation).
pub fn set_order_status(state: &AppState, order_number: &str, status: &str) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE orders SET status = ?2 WHERE order_number = ?1",
        params![order_number, status],
    )
    .unwrap();
}
