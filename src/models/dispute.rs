use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Pending,
    Resolved,
    Rejected,
}

impl DisputeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DisputeStatus::Pending => "pending",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(DisputeStatus::Pending),
            "resolved" => Some(DisputeStatus::Resolved),
            "rejected" => Some(DisputeStatus::Rejected),
            _ => None,
        }
    }

    /// Only resolved/rejected are legal outcomes of a resolution.
    pub fn is_final(self) -> bool {
        matches!(self, DisputeStatus::Resolved | DisputeStatus::Rejected)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentDispute {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub raised_by_user_id: Uuid,
    pub reason: String,
    pub description: Option<String>,
    pub status: String,
    pub resolution: Option<String>,
    pub resolved_by_user_id: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::DisputeStatus;

    #[test]
    fn only_terminal_outcomes_are_final() {
        assert!(!DisputeStatus::Pending.is_final());
        assert!(DisputeStatus::Resolved.is_final());
        assert!(DisputeStatus::Rejected.is_final());
        assert_eq!(DisputeStatus::parse("resolved"), Some(DisputeStatus::Resolved));
        assert_eq!(DisputeStatus::parse("open"), None);
    }
}
