//! Lease and signature models plus the lifecycle decision helpers.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lease lifecycle states. Transitions are enforced by the lifecycle
/// service; everything else treats the status as opaque text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Draft,
    PendingSignature,
    Active,
    Terminated,
    Expired,
    Renewed,
}

impl LeaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseStatus::Draft => "draft",
            LeaseStatus::PendingSignature => "pending_signature",
            LeaseStatus::Active => "active",
            LeaseStatus::Terminated => "terminated",
            LeaseStatus::Expired => "expired",
            LeaseStatus::Renewed => "renewed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "draft" => Some(LeaseStatus::Draft),
            "pending_signature" => Some(LeaseStatus::PendingSignature),
            "active" => Some(LeaseStatus::Active),
            "terminated" => Some(LeaseStatus::Terminated),
            "expired" => Some(LeaseStatus::Expired),
            "renewed" => Some(LeaseStatus::Renewed),
            _ => None,
        }
    }

    /// Legal state-machine edges. Terminal states have no outgoing edges.
    pub fn can_transition(self, next: LeaseStatus) -> bool {
        use LeaseStatus::*;
        matches!(
            (self, next),
            (Draft, PendingSignature)
                | (PendingSignature, Active)
                | (Active, Terminated)
                | (Active, Expired)
                | (Active, Renewed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    Landlord,
    Tenant,
}

impl SignerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SignerRole::Landlord => "landlord",
            SignerRole::Tenant => "tenant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "landlord" => Some(SignerRole::Landlord),
            "tenant" => Some(SignerRole::Tenant),
            _ => None,
        }
    }
}

/// Roles whose signatures are required before a lease can activate.
pub const REQUIRED_SIGNER_ROLES: &[SignerRole] = &[SignerRole::Landlord, SignerRole::Tenant];

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Lease {
    pub id: Uuid,
    pub lease_number: String,
    pub property_id: Uuid,
    pub tenant_user_id: Uuid,
    pub application_id: Option<Uuid>,
    pub previous_lease_id: Option<Uuid>,
    pub status: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub monthly_rent: Decimal,
    pub security_deposit: Decimal,
    pub payment_due_day: i16,
    pub terms: Option<String>,
    pub special_conditions: Option<String>,
    pub auto_renew: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub termination_reason: Option<String>,
    pub created_by_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lease {
    pub fn lease_status(&self) -> Option<LeaseStatus> {
        LeaseStatus::parse(&self.status)
    }

    /// The lease covers `date` when it falls inside [starts_on, ends_on].
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.starts_on <= date && date <= self.ends_on
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LeaseSignature {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub user_id: Uuid,
    pub signer_role: String,
    pub signature_data: String,
    pub ip_address: Option<String>,
    pub signed_at: DateTime<Utc>,
}

/// True when every required signer role appears in `signed_roles`.
pub fn signatures_complete(signed_roles: &[String]) -> bool {
    REQUIRED_SIGNER_ROLES
        .iter()
        .all(|role| signed_roles.iter().any(|signed| signed == role.as_str()))
}

/// A renewal may be initiated within `window_days` of the lease end, up to
/// and including the end date itself.
pub fn renewal_window_open(today: NaiveDate, ends_on: NaiveDate, window_days: i64) -> bool {
    let window_start = ends_on - chrono::Duration::days(window_days);
    today >= window_start && today <= ends_on
}

/// Add calendar months to a date, clamping the day to the target month's
/// length (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let zero_based = date.month0() as i32 + months;
    let year = date.year() + zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let mut day = date.day();
    loop {
        if let Some(result) = NaiveDate::from_ymd_opt(year, month, day) {
            return result;
        }
        day -= 1;
    }
}

/// Validate a termination request against the lease bounds.
pub fn termination_valid(
    reason: &str,
    termination_date: NaiveDate,
    starts_on: NaiveDate,
    ends_on: NaiveDate,
) -> Result<(), &'static str> {
    if reason.trim().chars().count() < 10 {
        return Err("Termination reason must be at least 10 characters.");
    }
    if termination_date < starts_on || termination_date > ends_on {
        return Err("Termination date must fall within the lease term.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        add_months, renewal_window_open, signatures_complete, termination_valid, LeaseStatus,
        SignerRole,
    };

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").expect("valid date")
    }

    #[test]
    fn transition_matrix() {
        use LeaseStatus::*;
        assert!(PendingSignature.can_transition(Active));
        assert!(Active.can_transition(Terminated));
        assert!(Active.can_transition(Expired));
        assert!(Active.can_transition(Renewed));
        assert!(!PendingSignature.can_transition(Terminated));
        assert!(!Terminated.can_transition(Active));
        assert!(!Expired.can_transition(Active));
        assert!(!Renewed.can_transition(Active));
        assert!(!Active.can_transition(PendingSignature));
    }

    #[test]
    fn status_round_trips() {
        for status in [
            LeaseStatus::Draft,
            LeaseStatus::PendingSignature,
            LeaseStatus::Active,
            LeaseStatus::Terminated,
            LeaseStatus::Expired,
            LeaseStatus::Renewed,
        ] {
            assert_eq!(LeaseStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LeaseStatus::parse("bogus"), None);
    }

    #[test]
    fn signature_completion_requires_both_roles() {
        assert!(!signatures_complete(&[]));
        assert!(!signatures_complete(&["landlord".to_string()]));
        assert!(!signatures_complete(&["tenant".to_string()]));
        assert!(signatures_complete(&[
            "landlord".to_string(),
            "tenant".to_string()
        ]));
        // duplicates of one role never satisfy the other
        assert!(!signatures_complete(&[
            "tenant".to_string(),
            "tenant".to_string()
        ]));
        assert_eq!(SignerRole::parse("landlord"), Some(SignerRole::Landlord));
        assert_eq!(SignerRole::parse("owner"), None);
    }

    #[test]
    fn renewal_window_bounds() {
        let ends_on = date("2026-06-30");
        assert!(!renewal_window_open(date("2026-04-30"), ends_on, 60));
        assert!(renewal_window_open(date("2026-05-01"), ends_on, 60));
        assert!(renewal_window_open(date("2026-06-30"), ends_on, 60));
        assert!(!renewal_window_open(date("2026-07-01"), ends_on, 60));
    }

    #[test]
    fn month_addition_clamps_short_months() {
        assert_eq!(add_months(date("2026-01-31"), 1), date("2026-02-28"));
        assert_eq!(add_months(date("2024-01-31"), 1), date("2024-02-29"));
        assert_eq!(add_months(date("2026-03-15"), 12), date("2027-03-15"));
        assert_eq!(add_months(date("2026-11-30"), 3), date("2027-02-28"));
    }

    #[test]
    fn termination_validation() {
        let starts = date("2026-01-01");
        let ends = date("2026-12-31");
        assert!(termination_valid("tenant relocated abroad", date("2026-06-15"), starts, ends).is_ok());
        assert!(termination_valid("too short", date("2026-06-15"), starts, ends).is_err());
        assert!(
            termination_valid("tenant relocated abroad", date("2027-01-01"), starts, ends).is_err()
        );
        assert!(
            termination_valid("tenant relocated abroad", date("2025-12-31"), starts, ends).is_err()
        );
    }
}
