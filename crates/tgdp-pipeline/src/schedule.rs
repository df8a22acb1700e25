//! Daily schedule
//!
//! Fires a job once a day at a fixed UTC wall time until shutdown is signalled.
//! A failing run does not stop the schedule; the job decides what to log.

use chrono::{DateTime, Days, NaiveTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::info;

pub const SCHEDULE_TIME_FORMAT: &str = "%H:%M";

/// Parse `HH:MM` (24h, UTC)
pub fn parse_daily_time(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(raw.trim(), SCHEDULE_TIME_FORMAT)
}

/// First instant strictly after `now` whose UTC time of day is `at`
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        return today;
    }
    match now.date_naive().checked_add_days(Days::new(1)) {
        Some(tomorrow) => tomorrow.and_time(at).and_utc(),
        None => today,
    }
}

/// Run `job` every day at `at` until `shutdown` completes.
///
/// Shutdown is observed while waiting, not while a run is in progress.
pub async fn run_daily<F, Fut, S>(at: NaiveTime, shutdown: S, mut job: F) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut runs = 0u64;

    loop {
        let now = Utc::now();
        let next = next_run_after(now, at);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(next_run = %next, wait_secs = wait.as_secs(), "Next pipeline run scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                runs += 1;
                job().await;
            },
            _ = &mut shutdown => {
                info!(runs, "Schedule stopped");
                return runs;
            },
        }
    }
}
