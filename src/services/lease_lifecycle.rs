//! Lease lifecycle manager.
//!
//! Owns every status transition:
//! pending_signature → active (signature completion),
//! active → terminated | expired | renewed. Callers never write
//! `leases.status` directly.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::lease::{
    add_months, renewal_window_open, signatures_complete, termination_valid, Lease, LeaseSignature,
    LeaseStatus, SignerRole,
};
use crate::schemas::{CreateLeaseDraftInput, RecordSignatureInput, RenewLeaseInput};
use crate::services::numbering;

/// Outcome of recording a signature.
#[derive(Debug)]
pub struct SignResult {
    pub lease: Lease,
    pub signature: LeaseSignature,
    /// True when this signature completed the set and activated the lease.
    pub activated: bool,
}

/// Create a lease from an approved rental application. The lease is
/// persisted directly in `pending_signature` with zero signatures.
pub async fn create_draft(
    pool: &PgPool,
    clock: &dyn Clock,
    created_by_user_id: &str,
    input: &CreateLeaseDraftInput,
) -> AppResult<Lease> {
    let application_id = parse_uuid(&input.application_id, "application_id")?;
    let created_by = parse_uuid(created_by_user_id, "user id")?;

    if input.monthly_rent < Decimal::ZERO || input.security_deposit < Decimal::ZERO {
        return Err(AppError::UnprocessableEntity(
            "Rent and deposit must be non-negative.".to_string(),
        ));
    }

    let application = sqlx::query_as::<_, (Uuid, Uuid, String, Option<NaiveDate>)>(
        "SELECT property_id, applicant_user_id, status, desired_move_in
         FROM rental_applications WHERE id = $1",
    )
    .bind(application_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound("Rental application not found.".to_string()))?;

    let (property_id, applicant_user_id, application_status, desired_move_in) = application;
    if application_status != "approved" {
        return Err(AppError::InvalidState(format!(
            "Application must be approved to create a lease (status: {application_status})."
        )));
    }

    let live_leases = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM leases
         WHERE application_id = $1 AND status IN ('pending_signature', 'active')",
    )
    .bind(application_id)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;
    if live_leases > 0 {
        return Err(AppError::InvalidState(
            "Application already has a lease in progress.".to_string(),
        ));
    }

    let starts_on = match input.starts_on.as_deref() {
        Some(raw) => parse_date(raw, "starts_on")?,
        None => desired_move_in.unwrap_or_else(|| clock.today()),
    };
    let ends_on = add_months(starts_on, input.duration_months);
    if ends_on <= starts_on {
        return Err(AppError::UnprocessableEntity(
            "Lease must end after it starts.".to_string(),
        ));
    }

    let lease = sqlx::query_as::<_, Lease>(
        "INSERT INTO leases (lease_number, property_id, tenant_user_id, application_id,
                             status, starts_on, ends_on, monthly_rent, security_deposit,
                             payment_due_day, terms, special_conditions, auto_renew,
                             created_by_user_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         RETURNING *",
    )
    .bind(numbering::lease_number(clock.now_utc()))
    .bind(property_id)
    .bind(applicant_user_id)
    .bind(application_id)
    .bind(LeaseStatus::PendingSignature.as_str())
    .bind(starts_on)
    .bind(ends_on)
    .bind(input.monthly_rent)
    .bind(input.security_deposit)
    .bind(input.payment_due_day)
    .bind(input.terms.as_deref())
    .bind(input.special_conditions.as_deref())
    .bind(input.auto_renew)
    .bind(created_by)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;

    tracing::info!(
        lease_id = %lease.id,
        lease_number = %lease.lease_number,
        "Lease created from application"
    );
    Ok(lease)
}

/// Record a party's signature. Idempotent for the same user re-signing the
/// same role; a different user on an already-signed role is a conflict.
/// Activates the lease once both required roles have signed, and marks a
/// renewed predecessor at that moment.
pub async fn record_signature(
    pool: &PgPool,
    clock: &dyn Clock,
    signer_user_id: &str,
    lease_id: &str,
    input: &RecordSignatureInput,
) -> AppResult<SignResult> {
    let lease_id = parse_uuid(lease_id, "lease_id")?;
    let user_id = parse_uuid(signer_user_id, "user id")?;
    let role = SignerRole::parse(&input.signer_role).ok_or_else(|| {
        AppError::UnprocessableEntity(format!(
            "Unknown signer role '{}'.",
            input.signer_role
        ))
    })?;

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let lease = sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1 FOR UPDATE")
        .bind(lease_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Lease not found.".to_string()))?;

    if lease.lease_status() != Some(LeaseStatus::PendingSignature) {
        return Err(AppError::InvalidState(format!(
            "Lease is not awaiting signatures (status: {}).",
            lease.status
        )));
    }

    assert_signer_matches_party(&mut tx, &lease, role, user_id).await?;

    let existing = sqlx::query_as::<_, LeaseSignature>(
        "SELECT * FROM lease_signatures WHERE lease_id = $1 AND signer_role = $2",
    )
    .bind(lease_id)
    .bind(role.as_str())
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_error)?;

    let signature = match existing {
        Some(previous) if previous.user_id != user_id => {
            return Err(AppError::Conflict(format!(
                "The {} role has already been signed by another user.",
                role.as_str()
            )));
        }
        Some(previous) => {
            // same signer re-signing: refresh the record in place
            sqlx::query_as::<_, LeaseSignature>(
                "UPDATE lease_signatures
                 SET signature_data = $1, ip_address = $2, signed_at = $3
                 WHERE id = $4
                 RETURNING *",
            )
            .bind(&input.signature_data)
            .bind(input.ip_address.as_deref())
            .bind(clock.now_utc())
            .bind(previous.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?
        }
        None => sqlx::query_as::<_, LeaseSignature>(
            "INSERT INTO lease_signatures (lease_id, user_id, signer_role, signature_data,
                                           ip_address, signed_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(lease_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(&input.signature_data)
        .bind(input.ip_address.as_deref())
        .bind(clock.now_utc())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?,
    };

    let signed_roles = sqlx::query_scalar::<_, String>(
        "SELECT signer_role FROM lease_signatures WHERE lease_id = $1",
    )
    .bind(lease_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(map_db_error)?;

    let activated = signatures_complete(&signed_roles);
    let lease = if activated {
        let activated_lease = sqlx::query_as::<_, Lease>(
            "UPDATE leases
             SET status = 'active',
                 signed_at = (SELECT MAX(signed_at) FROM lease_signatures WHERE lease_id = $1),
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(lease_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;

        // Renewal policy: the predecessor is superseded only once its
        // replacement is fully executed.
        if let Some(previous_id) = activated_lease.previous_lease_id {
            sqlx::query(
                "UPDATE leases SET status = 'renewed', updated_at = now()
                 WHERE id = $1 AND status = 'active'",
            )
            .bind(previous_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }

        activated_lease
    } else {
        lease
    };

    tx.commit().await.map_err(map_db_error)?;

    if activated {
        tracing::info!(lease_id = %lease.id, "Lease fully signed and activated");
    }
    Ok(SignResult {
        lease,
        signature,
        activated,
    })
}

/// Terminate an active lease early.
pub async fn terminate(
    pool: &PgPool,
    clock: &dyn Clock,
    lease_id: &str,
    reason: &str,
    termination_date: NaiveDate,
) -> AppResult<Lease> {
    let lease_id = parse_uuid(lease_id, "lease_id")?;

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let lease = sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1 FOR UPDATE")
        .bind(lease_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Lease not found.".to_string()))?;

    if lease.lease_status() != Some(LeaseStatus::Active) {
        return Err(AppError::InvalidState(format!(
            "Only active leases can be terminated (status: {}).",
            lease.status
        )));
    }
    termination_valid(reason, termination_date, lease.starts_on, lease.ends_on)
        .map_err(|message| AppError::UnprocessableEntity(message.to_string()))?;

    let terminated = sqlx::query_as::<_, Lease>(
        "UPDATE leases
         SET status = 'terminated', terminated_at = $1, termination_reason = $2,
             updated_at = now()
         WHERE id = $3
         RETURNING *",
    )
    .bind(clock.now_utc())
    .bind(reason.trim())
    .bind(lease_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(lease_id = %terminated.id, "Lease terminated");
    Ok(terminated)
}

/// Create a renewal lease chained to an active lease nearing its end.
/// The source lease keeps invoicing until the renewal activates.
pub async fn renew(
    pool: &PgPool,
    clock: &dyn Clock,
    config: &AppConfig,
    created_by_user_id: &str,
    lease_id: &str,
    input: &RenewLeaseInput,
) -> AppResult<Lease> {
    let source_id = parse_uuid(lease_id, "lease_id")?;
    let created_by = parse_uuid(created_by_user_id, "user id")?;

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let source = sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1 FOR UPDATE")
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Lease not found.".to_string()))?;

    if source.lease_status() != Some(LeaseStatus::Active) {
        return Err(AppError::InvalidState(format!(
            "Only active leases can be renewed (status: {}).",
            source.status
        )));
    }
    if !renewal_window_open(clock.today(), source.ends_on, config.renewal_window_days) {
        return Err(AppError::InvalidState(format!(
            "Renewal opens {} days before the lease end ({}).",
            config.renewal_window_days, source.ends_on
        )));
    }

    let pending_renewals = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM leases
         WHERE previous_lease_id = $1 AND status IN ('pending_signature', 'active')",
    )
    .bind(source_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;
    if pending_renewals > 0 {
        return Err(AppError::Conflict(
            "A renewal for this lease already exists.".to_string(),
        ));
    }

    let starts_on = source.ends_on + chrono::Duration::days(1);
    let ends_on = add_months(starts_on, input.extension_months);
    let monthly_rent = input.new_monthly_rent.unwrap_or(source.monthly_rent);
    let security_deposit = input
        .new_security_deposit
        .unwrap_or(source.security_deposit);
    if monthly_rent < Decimal::ZERO || security_deposit < Decimal::ZERO {
        return Err(AppError::UnprocessableEntity(
            "Rent and deposit must be non-negative.".to_string(),
        ));
    }
    let terms = merge_terms(source.terms.as_deref(), input.additional_terms.as_deref());

    let renewal = sqlx::query_as::<_, Lease>(
        "INSERT INTO leases (lease_number, property_id, tenant_user_id, previous_lease_id,
                             status, starts_on, ends_on, monthly_rent, security_deposit,
                             payment_due_day, terms, special_conditions, auto_renew,
                             created_by_user_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         RETURNING *",
    )
    .bind(numbering::lease_number(clock.now_utc()))
    .bind(source.property_id)
    .bind(source.tenant_user_id)
    .bind(source_id)
    .bind(LeaseStatus::PendingSignature.as_str())
    .bind(starts_on)
    .bind(ends_on)
    .bind(monthly_rent)
    .bind(security_deposit)
    .bind(source.payment_due_day)
    .bind(terms.as_deref())
    .bind(source.special_conditions.as_deref())
    .bind(source.auto_renew)
    .bind(created_by)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        source_lease_id = %source.id,
        renewal_lease_id = %renewal.id,
        "Renewal lease created"
    );
    Ok(renewal)
}

/// The signing user must be the lease party the role names: the lease's
/// tenant, or the landlord of the lease's property.
async fn assert_signer_matches_party(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    lease: &Lease,
    role: SignerRole,
    user_id: Uuid,
) -> AppResult<()> {
    let expected = match role {
        SignerRole::Tenant => lease.tenant_user_id,
        SignerRole::Landlord => {
            sqlx::query_scalar::<_, Uuid>("SELECT landlord_user_id FROM properties WHERE id = $1")
                .bind(lease.property_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?
                .ok_or_else(|| AppError::NotFound("Lease property not found.".to_string()))?
        }
    };

    if expected != user_id {
        return Err(AppError::Forbidden(format!(
            "Only the lease {} may sign as {}.",
            role.as_str(),
            role.as_str()
        )));
    }
    Ok(())
}

fn merge_terms(source_terms: Option<&str>, additional: Option<&str>) -> Option<String> {
    match (
        source_terms.map(str::trim).filter(|value| !value.is_empty()),
        additional.map(str::trim).filter(|value| !value.is_empty()),
    ) {
        (Some(base), Some(extra)) => Some(format!("{base}\n\n{extra}")),
        (Some(base), None) => Some(base.to_string()),
        (None, Some(extra)) => Some(extra.to_string()),
        (None, None) => None,
    }
}

fn parse_uuid(raw: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid {what}.")))
}

fn parse_date(raw: &str, what: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("{what} must be YYYY-MM-DD.")))
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Lease lifecycle query failed");
    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use super::{merge_terms, parse_date, parse_uuid};

    #[test]
    fn merges_renewal_terms() {
        assert_eq!(merge_terms(None, None), None);
        assert_eq!(
            merge_terms(Some("base terms"), None),
            Some("base terms".to_string())
        );
        assert_eq!(
            merge_terms(None, Some("extra clause")),
            Some("extra clause".to_string())
        );
        assert_eq!(
            merge_terms(Some("base terms"), Some("extra clause")),
            Some("base terms\n\nextra clause".to_string())
        );
        assert_eq!(merge_terms(Some("  "), Some("x")), Some("x".to_string()));
    }

    #[test]
    fn parses_ids_and_dates() {
        assert!(parse_uuid("550e8400-e29b-41d4-a716-446655440000", "lease_id").is_ok());
        assert!(parse_uuid("nope", "lease_id").is_err());
        assert!(parse_date("2026-02-28", "starts_on").is_ok());
        assert!(parse_date("02/28/2026", "starts_on").is_err());
    }
}
