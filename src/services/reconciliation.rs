//! Payment and dispute reconciliation.
//!
//! Every mutation runs in a transaction that takes `FOR UPDATE` on the
//! invoice row, so two concurrent payments can never both pass the
//! remaining-balance check for the same invoice.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::dispute::{DisputeStatus, PaymentDispute};
use crate::models::invoice::{settlement_status, Invoice, InvoiceStatus};
use crate::models::payment::{Payment, PaymentMethod, PaymentStatus};
use crate::schemas::{ApplyPaymentInput, RaiseDisputeInput, ResolveDisputeInput};

/// Apply a payment to an invoice and recompute its status.
pub async fn apply_payment(
    pool: &PgPool,
    clock: &dyn Clock,
    config: &AppConfig,
    recorded_by_user_id: &str,
    invoice_id: &str,
    input: &ApplyPaymentInput,
) -> AppResult<(Payment, Invoice)> {
    let invoice_id = parse_uuid(invoice_id, "invoice_id")?;
    let recorded_by = parse_uuid(recorded_by_user_id, "user id")?;

    if input.amount <= Decimal::ZERO {
        return Err(AppError::UnprocessableEntity(
            "Payment amount must be positive.".to_string(),
        ));
    }
    let method = PaymentMethod::parse(&input.payment_method).ok_or_else(|| {
        AppError::UnprocessableEntity(format!(
            "Unknown payment method '{}'.",
            input.payment_method
        ))
    })?;

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;

    if invoice.invoice_status() == Some(InvoiceStatus::Disputed)
        && config.disputed_invoices_block_payments
    {
        return Err(AppError::InvalidState(
            "Invoice is disputed; resolve the dispute before paying.".to_string(),
        ));
    }

    let remaining = invoice.remaining_amount();
    if input.amount > remaining {
        return Err(AppError::UnprocessableEntity(format!(
            "Payment of {} exceeds the remaining balance of {remaining}.",
            input.amount
        )));
    }

    let payment = sqlx::query_as::<_, Payment>(
        "INSERT INTO payments (invoice_id, amount, payment_method, status, paid_at,
                               recorded_by_user_id, notes)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(invoice_id)
    .bind(input.amount)
    .bind(method.as_str())
    .bind(PaymentStatus::Completed.as_str())
    .bind(clock.now_utc())
    .bind(recorded_by)
    .bind(input.notes.as_deref())
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    let new_paid = invoice.paid_amount + input.amount;
    // A disputed invoice stays disputed until resolution recomputes it.
    let next_status = if invoice.invoice_status() == Some(InvoiceStatus::Disputed) {
        InvoiceStatus::Disputed
    } else {
        settlement_status(
            invoice.total_amount,
            new_paid,
            invoice.due_date,
            clock.today(),
        )
    };

    let updated = sqlx::query_as::<_, Invoice>(
        "UPDATE invoices
         SET paid_amount = $1, status = $2, updated_at = now()
         WHERE id = $3
         RETURNING *",
    )
    .bind(new_paid)
    .bind(next_status.as_str())
    .bind(invoice_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        invoice_id = %updated.id,
        amount = %payment.amount,
        status = %updated.status,
        "Payment applied"
    );
    Ok((payment, updated))
}

/// Open a dispute against an invoice. One open dispute at a time.
pub async fn raise_dispute(
    pool: &PgPool,
    raised_by_user_id: &str,
    invoice_id: &str,
    input: &RaiseDisputeInput,
) -> AppResult<(PaymentDispute, Invoice)> {
    let invoice_id = parse_uuid(invoice_id, "invoice_id")?;
    let raised_by = parse_uuid(raised_by_user_id, "user id")?;

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    if invoice.invoice_status() == Some(InvoiceStatus::Disputed) {
        return Err(AppError::Conflict(
            "Invoice already has an open dispute.".to_string(),
        ));
    }

    // the partial unique index on (invoice_id) WHERE status='pending'
    // backs this insert against races
    let dispute = sqlx::query_as::<_, PaymentDispute>(
        "INSERT INTO payment_disputes (invoice_id, raised_by_user_id, reason, description, status)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(invoice_id)
    .bind(raised_by)
    .bind(input.reason.trim())
    .bind(input.description.as_deref())
    .bind(DisputeStatus::Pending.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    let updated = sqlx::query_as::<_, Invoice>(
        "UPDATE invoices SET status = 'disputed', updated_at = now()
         WHERE id = $1
         RETURNING *",
    )
    .bind(invoice_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        invoice_id = %updated.id,
        dispute_id = %dispute.id,
        "Dispute raised"
    );
    Ok((dispute, updated))
}

/// Close a dispute and restore the invoice to its computed status.
pub async fn resolve_dispute(
    pool: &PgPool,
    clock: &dyn Clock,
    resolver_user_id: &str,
    dispute_id: &str,
    input: &ResolveDisputeInput,
) -> AppResult<(PaymentDispute, Invoice)> {
    let dispute_id = parse_uuid(dispute_id, "dispute_id")?;
    let resolver = parse_uuid(resolver_user_id, "user id")?;

    let outcome = DisputeStatus::parse(&input.new_status)
        .filter(|status| status.is_final())
        .ok_or_else(|| {
            AppError::UnprocessableEntity(
                "Dispute outcome must be 'resolved' or 'rejected'.".to_string(),
            )
        })?;

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let dispute = sqlx::query_as::<_, PaymentDispute>(
        "SELECT * FROM payment_disputes WHERE id = $1 FOR UPDATE",
    )
    .bind(dispute_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_error)?
    .filter(|found| found.status == DisputeStatus::Pending.as_str())
    .ok_or_else(|| AppError::NotFound("Dispute not found or already resolved.".to_string()))?;

    let resolved = sqlx::query_as::<_, PaymentDispute>(
        "UPDATE payment_disputes
         SET status = $1, resolution = $2, resolved_by_user_id = $3, resolved_at = $4
         WHERE id = $5
         RETURNING *",
    )
    .bind(outcome.as_str())
    .bind(input.resolution.trim())
    .bind(resolver)
    .bind(clock.now_utc())
    .bind(dispute_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    let invoice = lock_invoice(&mut tx, dispute.invoice_id).await?;
    let restored_status = settlement_status(
        invoice.total_amount,
        invoice.paid_amount,
        invoice.due_date,
        clock.today(),
    );
    let updated = sqlx::query_as::<_, Invoice>(
        "UPDATE invoices SET status = $1, updated_at = now()
         WHERE id = $2
         RETURNING *",
    )
    .bind(restored_status.as_str())
    .bind(dispute.invoice_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        dispute_id = %resolved.id,
        invoice_id = %updated.id,
        outcome = %resolved.status,
        restored_status = %updated.status,
        "Dispute resolved"
    );
    Ok((resolved, updated))
}

async fn lock_invoice(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    invoice_id: Uuid,
) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))
}

fn parse_uuid(raw: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid {what}.")))
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Reconciliation query failed");
    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}
