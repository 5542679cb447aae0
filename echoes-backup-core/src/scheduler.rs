//! Background task firing [`Pipeline::run_daily`] once a day at a wall-clock time.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Local, NaiveDateTime, NaiveTime};
use tokio::task::{JoinError, JoinHandle};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::synchronise::Pipeline;

/// The first occurrence of `at` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        (now.date() + Duration::days(1)).and_time(at)
    }
}

pub struct DailyScheduler {
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl DailyScheduler {
    /// Spawn the schedule loop. The first run happens at the next occurrence of `at`.
    pub fn start(pipeline: Arc<Pipeline>, at: NaiveTime) -> Self {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let handle = tokio::spawn(Self::schedule_loop(pipeline, at, token));
        Self {
            handle: Some(handle),
            cancel_token,
        }
    }

    async fn schedule_loop(pipeline: Arc<Pipeline>, at: NaiveTime, cancel_token: CancellationToken) {
        info!(run_at = %at, "[SCHEDULE] Daily scheduler started");
        loop {
            let now = Local::now().naive_local();
            let next = next_run_after(now, at);
            let wait = (next - now).to_std().unwrap_or(StdDuration::ZERO);
            info!(next_run = %next, "[SCHEDULE] Next daily run scheduled");

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("[SCHEDULE] Daily scheduler cancelled");
                    break;
                }
                _ = time::sleep(wait) => {}
            }

            // Cancellation is only observed between runs.
            match pipeline.run_daily().await {
                Ok(report) => info!(?report, "[SCHEDULE] Daily run finished"),
                Err(e) => error!(error = %e, "[SCHEDULE] Daily run failed, next run resumes from the ledger"),
            }
        }
    }

    /// Ask the loop to stop. A run already in progress completes first.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Wait for the loop to exit.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = ?e, "Error joining daily scheduler");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::config::PipelineConfig;
    use crate::contract::{MockArchiver, MockNotifier, MockRemoteStore};
    use crate::ledger::SqliteLedger;
    use crate::stages::StageHandlers;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn moment(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 9, d).unwrap().and_time(at(h, m))
    }

    #[test]
    fn next_run_is_later_today_when_the_time_has_not_passed() {
        assert_eq!(next_run_after(moment(10, 0, 1), at(0, 5)), moment(10, 0, 5));
    }

    #[test]
    fn next_run_is_tomorrow_once_the_time_has_passed() {
        assert_eq!(next_run_after(moment(10, 0, 5), at(0, 5)), moment(11, 0, 5));
        assert_eq!(next_run_after(moment(30, 23, 0), at(0, 5)), NaiveDate::from_ymd_opt(2020, 10, 1).unwrap().and_time(at(0, 5)));
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_scheduler() {
        let handlers = StageHandlers::new(
            Arc::new(SqliteLedger::open_in_memory().unwrap()),
            Arc::new(MockArchiver::new()),
            Arc::new(MockRemoteStore::new()),
            Arc::new(MockNotifier::new()),
            PipelineConfig::new("/nonexistent", "client"),
        );
        // One minute before now, so the next run is almost a day away.
        let run_at = (Local::now() - Duration::minutes(1)).time();
        let mut scheduler = DailyScheduler::start(Arc::new(Pipeline::new(handlers)), run_at);

        scheduler.shutdown();
        time::timeout(StdDuration::from_secs(5), scheduler.join())
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
