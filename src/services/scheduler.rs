use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::services::billing;
use crate::state::AppState;

/// Background billing loop: sleep until the next midnight UTC, run the
/// daily cycle, reschedule. A failed cycle backs off for the configured
/// interval instead of crashing the process; the shutdown signal is
/// observed at every wait and inside the generation loop.
pub async fn run_billing_scheduler(state: AppState, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Billing scheduler started");

    let Some(pool) = state.db_pool.clone() else {
        tracing::warn!("Billing scheduler: no database pool configured, exiting");
        return;
    };

    loop {
        let delay = duration_until_next_midnight(state.clock.now_utc());
        tracing::info!(
            sleep_seconds = delay.as_secs(),
            "Billing scheduler waiting for next run"
        );
        if wait_or_shutdown(delay, &mut shutdown).await {
            tracing::info!("Billing scheduler stopping");
            return;
        }

        match billing::run_daily_billing_cycle(
            &pool,
            &state.http_client,
            &state.config,
            state.clock.as_ref(),
            &shutdown,
            false,
        )
        .await
        {
            Ok(result) => {
                tracing::info!(
                    created = result.invoices_created,
                    skipped = result.skipped_existing,
                    swept = result.swept_overdue,
                    errors = result.errors,
                    "Scheduled billing cycle finished"
                );
            }
            Err(error) => {
                let backoff = Duration::from_secs(state.config.billing_retry_backoff_seconds);
                tracing::warn!(
                    error = %error,
                    backoff_seconds = backoff.as_secs(),
                    "Billing cycle failed, backing off before retry"
                );
                if wait_or_shutdown(backoff, &mut shutdown).await {
                    tracing::info!("Billing scheduler stopping");
                    return;
                }
            }
        }
    }
}

/// Returns true when shutdown was requested (or the channel closed).
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

pub fn duration_until_next_midnight(now: DateTime<Utc>) -> Duration {
    let next_midnight = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    (next_midnight - now.naive_utc())
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::duration_until_next_midnight;

    #[test]
    fn computes_delay_to_next_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 2, 28, 23, 0, 0).unwrap();
        assert_eq!(duration_until_next_midnight(now).as_secs(), 3600);

        let at_midnight = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(duration_until_next_midnight(at_midnight).as_secs(), 86_400);

        let leap_eve = Utc.with_ymd_and_hms(2024, 2, 28, 12, 0, 0).unwrap();
        // Feb 2024 has a 29th; the next midnight is still 12h away
        assert_eq!(duration_until_next_midnight(leap_eve).as_secs(), 43_200);
    }
}
