use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_tenant_role() -> String {
    "tenant".to_string()
}
fn default_property_status() -> String {
    "active".to_string()
}
fn default_country_us() -> String {
    "US".to_string()
}
fn default_payment_due_day() -> i16 {
    1
}
fn default_false() -> bool {
    false
}
fn default_limit_100() -> i64 {
    100
}
fn default_limit_200() -> i64 {
    200
}

// ── Users ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateUserInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    pub phone_e164: Option<String>,
    #[serde(default = "default_tenant_role")]
    pub role: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateUserInput {
    pub full_name: Option<String>,
    pub phone_e164: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

// ── Properties ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub landlord_user_id: Option<String>,
    pub address_line1: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default = "default_country_us")]
    pub country_code: String,
    #[serde(default = "default_property_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePropertyInput {
    pub name: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub status: Option<String>,
}

// ── Rental applications ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateApplicationInput {
    pub property_id: String,
    pub desired_move_in: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DecideApplicationInput {
    /// "approved" or "rejected".
    pub decision: String,
    pub notes: Option<String>,
}

// ── Leases ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateLeaseDraftInput {
    pub application_id: String,
    /// Defaults to the application's desired move-in date.
    pub starts_on: Option<String>,
    #[validate(range(min = 1, max = 120))]
    pub duration_months: i32,
    pub monthly_rent: Decimal,
    #[serde(default)]
    pub security_deposit: Decimal,
    #[serde(default = "default_payment_due_day")]
    #[validate(range(min = 1, max = 28))]
    pub payment_due_day: i16,
    pub terms: Option<String>,
    pub special_conditions: Option<String>,
    #[serde(default = "default_false")]
    pub auto_renew: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordSignatureInput {
    /// "landlord" or "tenant".
    pub signer_role: String,
    #[validate(length(min = 1))]
    pub signature_data: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminateLeaseInput {
    pub reason: String,
    pub termination_date: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RenewLeaseInput {
    #[validate(range(min = 1, max = 120))]
    pub extension_months: i32,
    pub new_monthly_rent: Option<Decimal>,
    pub new_security_deposit: Option<Decimal>,
    pub additional_terms: Option<String>,
}

// ── Invoices, payments, disputes ───────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyPaymentInput {
    pub amount: Decimal,
    /// "cash", "bank_transfer" or "credit_card".
    pub payment_method: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RaiseDisputeInput {
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveDisputeInput {
    pub resolution: String,
    /// "resolved" or "rejected".
    pub new_status: String,
}

// ── Queries ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct UsersQuery {
    pub role: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesQuery {
    pub landlord_user_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationsQuery {
    pub property_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasesQuery {
    pub status: Option<String>,
    pub property_id: Option<String>,
    pub tenant_user_id: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicesQuery {
    pub lease_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditLogsQuery {
    pub entity_table: Option<String>,
    pub actor_user_id: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Paths ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct UserPath {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyPath {
    pub property_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationPath {
    pub application_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasePath {
    pub lease_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePath {
    pub invoice_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisputePath {
    pub dispute_id: String,
}

// ── Map helpers ────────────────────────────────────────────────────

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn clamp_limit_in_range(limit: i64, min: i64, max: i64) -> i64 {
    limit.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{clamp_limit_in_range, remove_nulls, serialize_to_map, UpdatePropertyInput};

    #[test]
    fn serializes_and_strips_nulls() {
        let input = UpdatePropertyInput {
            name: Some("Rosewood 12".to_string()),
            address_line1: None,
            city: None,
            status: Some("inactive".to_string()),
        };
        let map = remove_nulls(serialize_to_map(&input));
        assert_eq!(map.get("name"), Some(&json!("Rosewood 12")));
        assert_eq!(map.get("status"), Some(&json!("inactive")));
        assert!(!map.contains_key("address_line1"));
        assert!(!map.contains_key("city"));
    }

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(0, 1, 1000), 1);
        assert_eq!(clamp_limit_in_range(50, 1, 1000), 50);
        assert_eq!(clamp_limit_in_range(9999, 1, 1000), 1000);
    }
}
