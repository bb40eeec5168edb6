use serde::{Deserialize, Serialize};

/// One row of the notification dedup ledger: at most one record per
/// `(order_number, outcome)`, committed only on confirmed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub order_number: String,
    pub outcome: Outcome,
    /// Unix timestamp of confirmed delivery; NULL while a send is in flight.
    pub sent_at: Option<i64>,
    /// Delivery channel result ("resend", "webhook", "disabled", "in_flight").
    pub delivery_result: String,
}

/// Customer-facing payment outcomes a notification can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<crate::models::GatewayStatus> for Outcome {
    fn from(status: crate::models::GatewayStatus) -> Self {
        use crate::models::GatewayStatus;
        match status {
            GatewayStatus::Pending => Self::Pending,
            GatewayStatus::Approved => Self::Approved,
            GatewayStatus::Rejected => Self::Rejected,
            GatewayStatus::Cancelled => Self::Cancelled,
        }
    }
}
