use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::db::EventStore;
use crate::scheduler::queue::{JobFn, RetryScheduler};

/// Re-enqueues one job on a fixed cadence.
pub struct PollTimer {
    name: String,
    period: Duration,
    scheduler: RetryScheduler,
    job: JobFn,
}

impl PollTimer {
    pub fn new(name: impl Into<String>, period: Duration, scheduler: RetryScheduler, job: JobFn) -> Self {
        Self {
            name: name.into(),
            period,
            scheduler,
            job,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick is immediate; startup already queued a cycle

        loop {
            ticker.tick().await;
            debug!(job = %self.name, "poll timer fired");
            self.scheduler.enqueue(self.name.clone(), self.job.clone());
        }
    }
}

/// Periodically folds the WAL into the main database file.
pub async fn run_checkpoints(store: EventStore, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = store.checkpoint().await {
            warn!("WAL checkpoint failed: {e}");
        }
    }
}
