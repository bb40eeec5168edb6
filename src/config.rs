use std::env;
use std::time::Duration;

/// Payment methods whose bank-side clearing is slow enough to warrant the
/// longer pending threshold (PSE and plain bank transfers).
const SLOW_CLEARING_METHODS: &[&str] = &["pse", "bank_transfer", "debin_transfer"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub gateway: GatewayConfig,
    pub sweep: SweepConfig,
    pub backoff: BackoffConfig,
    pub notify: NotifyConfig,
    pub dev_mode: bool,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub access_token: String,
    /// Shared secret for webhook signature verification. When unset,
    /// signatures are not checked (local/dev setups).
    pub webhook_secret: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How long an order may sit with no payment at all before it is
    /// considered abandoned.
    pub abandoned_after: Duration,
    /// Pending-payment threshold for card-style methods.
    pub pending_card_after: Duration,
    /// Pending-payment threshold for slow bank-clearing methods.
    pub pending_bank_after: Duration,
    pub interval: Duration,
}

impl SweepConfig {
    /// Per-method pending threshold. Unknown methods get the card threshold.
    pub fn pending_threshold(&self, method: Option<&str>) -> Duration {
        match method {
            Some(m) if SLOW_CLEARING_METHODS.contains(&m) => self.pending_bank_after,
            _ => self.pending_card_after,
        }
    }
}

/// Capped exponential backoff parameters for retrying transient gateway
/// errors. The retry loop itself lives with the caller (poller, handlers).
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based). Grows multiplicatively
    /// from `base`, clamped at `cap`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let grown = self
            .base
            .saturating_mul(self.factor.saturating_pow(attempt.saturating_sub(1)));
        grown.min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub resend_api_key: Option<String>,
    pub from_email: String,
    pub webhook_url: Option<String>,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("PAYFLOW_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "payflow.db".to_string()),
            base_url,
            gateway: GatewayConfig {
                base_url: env::var("GATEWAY_BASE_URL")
                    .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
                access_token: env::var("GATEWAY_ACCESS_TOKEN").unwrap_or_default(),
                webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET").ok(),
                timeout: Duration::from_secs(env_u64("GATEWAY_TIMEOUT_SECS", 10)),
            },
            sweep: SweepConfig {
                abandoned_after: Duration::from_secs(
                    env_u64("ABANDONED_ORDER_MINUTES", 30) * 60,
                ),
                pending_card_after: Duration::from_secs(
                    env_u64("PENDING_CARD_MINUTES", 20) * 60,
                ),
                pending_bank_after: Duration::from_secs(
                    env_u64("PENDING_BANK_MINUTES", 45) * 60,
                ),
                interval: Duration::from_secs(env_u64("SWEEP_INTERVAL_SECS", 300)),
            },
            backoff: BackoffConfig {
                base: Duration::from_millis(env_u64("BACKOFF_BASE_MS", 500)),
                factor: env_u64("BACKOFF_FACTOR", 2) as u32,
                cap: Duration::from_millis(env_u64("BACKOFF_CAP_MS", 8000)),
                max_attempts: env_u64("BACKOFF_MAX_ATTEMPTS", 4) as u32,
            },
            notify: NotifyConfig {
                resend_api_key: env::var("RESEND_API_KEY").ok(),
                from_email: env::var("NOTIFY_FROM_EMAIL")
                    .unwrap_or_else(|_| "orders@example.com".to_string()),
                webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
            },
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
