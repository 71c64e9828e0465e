//! Recurring billing: the overdue/expiry sweeps and monthly invoice
//! generation.
//!
//! The cycle runs daily. Sweeps always run first so prior-period invoices
//! carry a correct status before new ones are created; generation itself
//! only happens on the first of the month (or on a forced manual trigger).
//! Per-lease failures are logged and counted, never propagated — one bad
//! lease must not starve the rest of the portfolio.

use chrono::{Datelike, NaiveDate};
use sqlx::PgPool;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::invoice::{due_date_for, first_of_month, Invoice, InvoiceStatus};
use crate::models::lease::Lease;
use crate::services::{notifications, numbering};

/// Counters for one billing cycle run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BillingCycleResult {
    pub swept_overdue: u64,
    pub leases_expired: u64,
    pub invoices_created: u32,
    pub skipped_existing: u32,
    pub notify_failures: u32,
    pub errors: u32,
}

/// Run one full daily cycle. Errors returned here are process-level
/// (database unreachable, sweep failed) and trigger the scheduler's
/// backoff; per-lease problems stay inside the counters.
pub async fn run_daily_billing_cycle(
    pool: &PgPool,
    http_client: &reqwest::Client,
    config: &AppConfig,
    clock: &dyn Clock,
    shutdown: &watch::Receiver<bool>,
    force_generation: bool,
) -> AppResult<BillingCycleResult> {
    let today = clock.today();
    let mut result = BillingCycleResult {
        swept_overdue: sweep_overdue_invoices(pool, today).await?,
        leases_expired: sweep_expired_leases(pool, today).await?,
        ..BillingCycleResult::default()
    };

    if !is_generation_day(today) && !force_generation {
        tracing::info!(
            swept = result.swept_overdue,
            expired = result.leases_expired,
            "Billing cycle: sweep-only day"
        );
        return Ok(result);
    }

    let billing_month = first_of_month(today);
    let leases = sqlx::query_as::<_, Lease>(
        "SELECT * FROM leases WHERE status = 'active' ORDER BY created_at",
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    for lease in &leases {
        if *shutdown.borrow() {
            tracing::warn!("Billing cycle: shutdown requested, aborting generation loop");
            break;
        }
        if !lease.covers(today) {
            continue;
        }

        match create_invoice_for_month(pool, clock, lease, billing_month).await {
            Ok(Some(invoice)) => {
                result.invoices_created += 1;
                result.notify_failures +=
                    notifications::notify_invoice_created(pool, http_client, config, &invoice, lease)
                        .await;
            }
            Ok(None) => {
                result.skipped_existing += 1;
            }
            Err(error) => {
                tracing::warn!(
                    lease_id = %lease.id,
                    error = %error,
                    "Billing cycle: invoice generation failed for lease"
                );
                result.errors += 1;
            }
        }
    }

    tracing::info!(
        swept = result.swept_overdue,
        expired = result.leases_expired,
        created = result.invoices_created,
        skipped = result.skipped_existing,
        notify_failures = result.notify_failures,
        errors = result.errors,
        "Billing cycle completed"
    );
    Ok(result)
}

/// Flag unpaid invoices whose due date has passed. Idempotent: a second
/// sweep on the same day matches nothing new.
pub async fn sweep_overdue_invoices(pool: &PgPool, today: NaiveDate) -> AppResult<u64> {
    let swept = sqlx::query(
        "UPDATE invoices
         SET status = 'overdue', updated_at = now()
         WHERE status IN ('pending', 'partially_paid')
           AND due_date < $1
           AND paid_amount < total_amount",
    )
    .bind(today)
    .execute(pool)
    .await
    .map_err(map_db_error)?
    .rows_affected();

    if swept > 0 {
        tracing::info!(swept, "Marked invoices overdue");
    }
    Ok(swept)
}

/// Expiry is a stored status: active leases whose end date has passed and
/// that were never renewed or terminated become expired here.
pub async fn sweep_expired_leases(pool: &PgPool, today: NaiveDate) -> AppResult<u64> {
    let expired = sqlx::query(
        "UPDATE leases
         SET status = 'expired', updated_at = now()
         WHERE status = 'active' AND ends_on < $1",
    )
    .bind(today)
    .execute(pool)
    .await
    .map_err(map_db_error)?
    .rows_affected();

    if expired > 0 {
        tracing::info!(expired, "Marked leases expired");
    }
    Ok(expired)
}

/// Insert the month's invoice for one lease. `ON CONFLICT DO NOTHING`
/// against the (lease_id, billing_month) unique index makes the operation
/// idempotent and race-safe against a manual trigger; `None` means the
/// month was already invoiced.
pub async fn create_invoice_for_month(
    pool: &PgPool,
    clock: &dyn Clock,
    lease: &Lease,
    billing_month: NaiveDate,
) -> AppResult<Option<Invoice>> {
    let due_date = due_date_for(billing_month, lease.payment_due_day);

    let invoice = sqlx::query_as::<_, Invoice>(
        "INSERT INTO invoices (invoice_number, lease_id, billing_month, issue_date,
                               due_date, total_amount, paid_amount, status)
         VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
         ON CONFLICT (lease_id, billing_month) DO NOTHING
         RETURNING *",
    )
    .bind(numbering::invoice_number(clock.now_utc()))
    .bind(lease.id)
    .bind(billing_month)
    .bind(clock.today())
    .bind(due_date)
    .bind(lease.monthly_rent)
    .bind(InvoiceStatus::Pending.as_str())
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    if let Some(created) = &invoice {
        tracing::info!(
            invoice_id = %created.id,
            invoice_number = %created.invoice_number,
            lease_id = %lease.id,
            billing_month = %billing_month,
            "Invoice created"
        );
    }
    Ok(invoice)
}

/// Invoices are generated once per calendar month, on the first.
pub fn is_generation_day(today: NaiveDate) -> bool {
    today.day() == 1
}

fn map_db_error(error: sqlx::Error) -> AppError {
    tracing::error!(db_error = %error, "Billing query failed");
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::is_generation_day;

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").expect("valid date")
    }

    #[test]
    fn only_the_first_is_a_generation_day() {
        assert!(is_generation_day(date("2026-03-01")));
        assert!(is_generation_day(date("2026-02-01")));
        assert!(!is_generation_day(date("2026-02-02")));
        assert!(!is_generation_day(date("2026-02-28")));
        assert!(!is_generation_day(date("2026-12-31")));
    }
}
