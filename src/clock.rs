use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

/// Source of "now" for every date comparison in the app.
///
/// All scheduling and billing math runs on UTC dates pulled from this trait
/// so tests can pin the calendar (month boundaries, leap years, due-date
/// clamping) deterministically.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now_utc().date_naive()
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl FixedClock {
    pub fn at(date: &str) -> Self {
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .expect("valid date")
            .and_hms_opt(12, 0, 0)
            .expect("valid time");
        FixedClock(DateTime::from_naive_utc_and_offset(parsed, Utc))
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, FixedClock};
    use chrono::NaiveDate;

    #[test]
    fn fixed_clock_pins_the_date() {
        let clock = FixedClock::at("2026-02-28");
        assert_eq!(
            clock.today(),
            NaiveDate::from_ymd_opt(2026, 2, 28).expect("valid date")
        );
    }
}
