use chrono::{DateTime, Utc};

/// Opaque human-readable reference numbers: a type prefix, the issue month,
/// and a random suffix. Uniqueness is backed by the DB unique constraints.
fn reference_number(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{prefix}-{}-{}",
        now.format("%Y%m"),
        suffix[..6].to_ascii_uppercase()
    )
}

pub fn lease_number(now: DateTime<Utc>) -> String {
    reference_number("LSE", now)
}

pub fn invoice_number(now: DateTime<Utc>) -> String {
    reference_number("INV", now)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{invoice_number, lease_number};

    #[test]
    fn numbers_carry_prefix_and_month() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let lease = lease_number(now);
        let invoice = invoice_number(now);
        assert!(lease.starts_with("LSE-202602-"));
        assert!(invoice.starts_with("INV-202602-"));
        assert_eq!(lease.len(), "LSE-202602-".len() + 6);
    }

    #[test]
    fn numbers_differ_between_calls() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert_ne!(invoice_number(now), invoice_number(now));
    }
}
