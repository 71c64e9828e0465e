//! Invoice model and the billing-period date/status math.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Overdue,
    Disputed,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Disputed => "disputed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(InvoiceStatus::Pending),
            "partially_paid" => Some(InvoiceStatus::PartiallyPaid),
            "paid" => Some(InvoiceStatus::Paid),
            "overdue" => Some(InvoiceStatus::Overdue),
            "disputed" => Some(InvoiceStatus::Disputed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub lease_id: Uuid,
    pub billing_month: NaiveDate,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn invoice_status(&self) -> Option<InvoiceStatus> {
        InvoiceStatus::parse(&self.status)
    }

    pub fn remaining_amount(&self) -> Decimal {
        self.total_amount - self.paid_amount
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

pub fn last_day_of_month(month: NaiveDate) -> NaiveDate {
    let next_month = if month.month() == 12 {
        NaiveDate::from_ymd_opt(month.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(month.year(), month.month() + 1, 1)
    };
    next_month
        .map(|first| first - chrono::Duration::days(1))
        .unwrap_or(month)
}

/// Due date for a billing month: the lease's payment due day, clamped to the
/// last day of that month (due day 31 in February falls on Feb 28/29).
pub fn due_date_for(billing_month: NaiveDate, payment_due_day: i16) -> NaiveDate {
    let day = payment_due_day.max(1) as u32;
    NaiveDate::from_ymd_opt(billing_month.year(), billing_month.month(), day)
        .unwrap_or_else(|| last_day_of_month(billing_month))
}

/// Status an invoice settles into from its amounts and due date, ignoring
/// any dispute overlay. Used by the overdue sweep, after payments, and when
/// a dispute is resolved.
pub fn settlement_status(
    total_amount: Decimal,
    paid_amount: Decimal,
    due_date: NaiveDate,
    today: NaiveDate,
) -> InvoiceStatus {
    let remaining = total_amount - paid_amount;
    if remaining <= Decimal::ZERO {
        return InvoiceStatus::Paid;
    }
    if due_date < today {
        return InvoiceStatus::Overdue;
    }
    if paid_amount > Decimal::ZERO {
        return InvoiceStatus::PartiallyPaid;
    }
    InvoiceStatus::Pending
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{
        due_date_for, first_of_month, last_day_of_month, settlement_status, InvoiceStatus,
    };

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").expect("valid date")
    }

    #[test]
    fn month_boundaries() {
        assert_eq!(first_of_month(date("2026-02-17")), date("2026-02-01"));
        assert_eq!(last_day_of_month(date("2026-02-01")), date("2026-02-28"));
        assert_eq!(last_day_of_month(date("2024-02-01")), date("2024-02-29"));
        assert_eq!(last_day_of_month(date("2026-12-01")), date("2026-12-31"));
    }

    #[test]
    fn due_date_clamps_to_month_length() {
        assert_eq!(due_date_for(date("2026-02-01"), 31), date("2026-02-28"));
        assert_eq!(due_date_for(date("2024-02-01"), 31), date("2024-02-29"));
        assert_eq!(due_date_for(date("2026-04-01"), 15), date("2026-04-15"));
        assert_eq!(due_date_for(date("2026-01-01"), 1), date("2026-01-01"));
    }

    #[test]
    fn settlement_status_from_amounts_and_dates() {
        let total = dec!(5_000_000);
        let today = date("2026-03-10");

        assert_eq!(
            settlement_status(total, Decimal::ZERO, date("2026-03-15"), today),
            InvoiceStatus::Pending
        );
        assert_eq!(
            settlement_status(total, dec!(1_000_000), date("2026-03-15"), today),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(
            settlement_status(total, total, date("2026-03-15"), today),
            InvoiceStatus::Paid
        );
        assert_eq!(
            settlement_status(total, dec!(1_000_000), date("2026-03-09"), today),
            InvoiceStatus::Overdue
        );
        // fully paid invoices never regress to overdue
        assert_eq!(
            settlement_status(total, total, date("2026-03-01"), today),
            InvoiceStatus::Paid
        );
        // a due date equal to today is not yet overdue
        assert_eq!(
            settlement_status(total, Decimal::ZERO, today, today),
            InvoiceStatus::Pending
        );
    }

    #[test]
    fn status_round_trips() {
        for status in [
            InvoiceStatus::Pending,
            InvoiceStatus::PartiallyPaid,
            InvoiceStatus::Paid,
            InvoiceStatus::Overdue,
            InvoiceStatus::Disputed,
        ] {
            assert_eq!(InvoiceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InvoiceStatus::parse("void"), None);
    }
}
