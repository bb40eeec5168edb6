use serde::{Deserialize, Serialize};

/// A payment as last seen at the gateway. Created on first sighting
/// (webhook or poll) and upserted by `id` on every subsequent sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Gateway-assigned identifier; never generated locally.
    pub id: String,
    pub order_number: String,
    /// The gateway's own vocabulary; mapped to `PaymentStatus` by the engine.
    pub status: GatewayStatus,
    /// Free-text reason code from the gateway (e.g. "cc_rejected_bad_filled_cvv").
    pub status_detail: Option<String>,
    /// Gateway payment method id (e.g. "visa", "pse").
    pub method: Option<String>,
    /// Provenance of the last write, for auditing.
    pub source_verified: UpdateSource,
    pub date_created: i64,
    pub date_approved: Option<i64>,
}

/// The gateway's payment status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl GatewayStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Map a raw gateway status string, treating anything unrecognized as
    /// pending. Never marks a payment approved or rejected on unknown input.
    pub fn from_gateway(raw: &str) -> Self {
        match raw.parse() {
            Ok(status) => status,
            Err(()) => {
                tracing::warn!("Unrecognized gateway status {:?}, treating as pending", raw);
                Self::Pending
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for GatewayStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which producer observed a payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    Webhook,
    Polled,
    Swept,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Polled => "polled",
            Self::Swept => "swept",
        }
    }
}

impl std::str::FromStr for UpdateSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "polled" => Ok(Self::Polled),
            "swept" => Ok(Self::Swept),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
