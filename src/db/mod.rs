mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::{BackoffConfig, SweepConfig};
use crate::engine::Engine;
use crate::gateway::PaymentGateway;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Single writer of canonical order/payment state.
    pub engine: Arc<Engine>,
    pub sweep: SweepConfig,
    pub backoff: BackoffConfig,
    /// Shared secret for webhook signature verification, if configured.
    pub webhook_secret: Option<String>,
    pub base_url: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        // WAL lets the webhook, poller, and sweeper write concurrently;
        // the busy timeout turns lock contention into a bounded wait.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))
    });
    Pool::builder().max_size(10).build(manager)
}
