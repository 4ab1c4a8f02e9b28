//! Single-lane retry queue.
//!
//! Jobs run one at a time in FIFO order. A failed job sleeps for its backoff,
//! then goes back to the FRONT of the queue, so it is retried before anything
//! enqueued after it. The backoff doubles on each retry; once the retry budget
//! is spent the job is logged and dropped. A job that panics is dropped
//! without retry.

use std::collections::VecDeque;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::latency::LatencyStats;
use crate::error::Result;

/// A re-runnable unit of work. Called once per attempt.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`JobFn`].
pub fn job<F, Fut>(f: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as BoxFuture<'static, Result<()>>)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

struct QueuedJob {
    name: String,
    run: JobFn,
    retries: u32,
    backoff: Duration,
    max_retries: u32,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedJob>,
    /// True while a drain task owns the queue.
    draining: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    /// Held for the duration of every job attempt; see `run_exclusive`.
    lane: tokio::sync::Mutex<()>,
    policy: RetryPolicy,
    running: AtomicBool,
    completed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    idle: Notify,
    latency: Arc<LatencyStats>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: bool,
    pub completed: u64,
    pub retried: u64,
    pub dropped: u64,
}

/// Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct RetryScheduler {
    inner: Arc<Inner>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, latency: Arc<LatencyStats>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                lane: tokio::sync::Mutex::new(()),
                policy,
                running: AtomicBool::new(false),
                completed: AtomicU64::new(0),
                retried: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                idle: Notify::new(),
                latency,
            }),
        }
    }

    /// Queue a job under the scheduler's default policy.
    pub fn enqueue(&self, name: impl Into<String>, run: JobFn) {
        self.enqueue_with_policy(name, run, self.inner.policy);
    }

    pub fn enqueue_with_policy(&self, name: impl Into<String>, run: JobFn, policy: RetryPolicy) {
        let job = QueuedJob {
            name: name.into(),
            run,
            retries: 0,
            backoff: policy.initial_backoff,
            max_retries: policy.max_retries,
        };
        let mut state = self.inner.state();
        debug!(job = %job.name, depth = state.queue.len() + 1, "job enqueued");
        state.queue.push_back(job);
        if !state.draining {
            state.draining = true;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(drain(inner));
        }
    }

    /// Run `fut` with the lane held: no job attempt overlaps it.
    pub async fn run_exclusive<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _lane = self.inner.lane.lock().await;
        fut.await
    }

    /// Resolves once the queue is empty and nothing is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.state();
                if state.queue.is_empty() && !state.draining {
                    return;
                }
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> SchedulerStats {
        let queued = self.inner.state().queue.len();
        SchedulerStats {
            queued,
            running: self.inner.running.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            retried: self.inner.retried.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn drain(inner: Arc<Inner>) {
    loop {
        let mut job = {
            let mut state = inner.state();
            match state.queue.pop_front() {
                Some(job) => job,
                None => {
                    state.draining = false;
                    drop(state);
                    inner.idle.notify_waiters();
                    return;
                }
            }
        };

        debug!(job = %job.name, attempt = job.retries + 1, "job start");
        let started = Instant::now();
        let outcome = {
            let _lane = inner.lane.lock().await;
            inner.running.store(true, Ordering::Relaxed);
            let run = &job.run;
            let outcome = AssertUnwindSafe(async move { run().await })
                .catch_unwind()
                .await;
            inner.running.store(false, Ordering::Relaxed);
            outcome
        };
        inner.latency.record(started.elapsed());

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                inner.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    job = %job.name,
                    attempts = job.retries + 1,
                    "job panicked, dropped: {}",
                    panic_message(payload.as_ref())
                );
                continue;
            }
        };

        match result {
            Ok(()) => {
                inner.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    job = %job.name,
                    attempt = job.retries + 1,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job complete"
                );
            }
            Err(e) if e.is_retryable() && job.retries < job.max_retries => {
                warn!(
                    job = %job.name,
                    attempt = job.retries + 1,
                    backoff_ms = job.backoff.as_millis() as u64,
                    "job failed, retrying: {e}"
                );
                tokio::time::sleep(job.backoff).await;
                job.retries += 1;
                job.backoff = job.backoff.saturating_mul(2);
                inner.retried.fetch_add(1, Ordering::Relaxed);
                inner.state().queue.push_front(job);
            }
            Err(e) => {
                inner.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    job = %job.name,
                    attempts = job.retries + 1,
                    retryable = e.is_retryable(),
                    "job dropped: {e}"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::error::AppError;

    fn scheduler(max_retries: u32) -> RetryScheduler {
        RetryScheduler::new(
            RetryPolicy {
                max_retries,
                initial_backoff: Duration::from_secs(1),
            },
            Arc::new(LatencyStats::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_is_attempted_max_retries_plus_one_times() {
        let sched = scheduler(3);
        let attempts = Arc::new(Mutex::new(Vec::<Instant>::new()));

        let log = attempts.clone();
        sched.enqueue(
            "always-fails",
            job(move || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(Instant::now());
                    Err(AppError::Upstream("boom".into()))
                }
            }),
        );
        sched.wait_idle().await;

        let at = attempts.lock().unwrap().clone();
        assert_eq!(at.len(), 4);
        let gaps: Vec<u64> = at.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![1, 2, 4]);

        let stats = sched.snapshot();
        assert_eq!(stats.retried, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_job_runs_before_later_jobs() {
        let sched = scheduler(3);
        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let failed_once = Arc::new(AtomicBool::new(false));

        let log = order.clone();
        let flag = failed_once.clone();
        sched.enqueue(
            "a",
            job(move || {
                let log = log.clone();
                let flag = flag.clone();
                async move {
                    log.lock().unwrap().push("A");
                    if flag.swap(true, Ordering::SeqCst) {
                        Ok(())
                    } else {
                        Err(AppError::Upstream("transient".into()))
                    }
                }
            }),
        );
        let log = order.clone();
        sched.enqueue(
            "b",
            job(move || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push("B");
                    Ok(())
                }
            }),
        );
        sched.wait_idle().await;

        assert_eq!(*order.lock().unwrap(), vec!["A", "A", "B"]);
        assert_eq!(sched.snapshot().completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failures_are_dropped_without_retry() {
        let sched = scheduler(3);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        sched.enqueue(
            "no-key",
            job(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::Auth("missing BITQUERY_API_KEY".into()))
                }
            }),
        );
        sched.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sched.snapshot().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_never_overlap() {
        let sched = scheduler(0);
        let active = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        for i in 0..5 {
            let active = active.clone();
            let max_seen = max_seen.clone();
            sched.enqueue(
                format!("job-{i}"),
                job(move || {
                    let active = active.clone();
                    let max_seen = max_seen.clone();
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            );
        }
        sched.wait_idle().await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(sched.snapshot().completed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn per_job_policy_overrides_default() {
        let sched = scheduler(3);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        sched.enqueue_with_policy(
            "one-shot",
            job(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::Upstream("down".into()))
                }
            }),
            RetryPolicy {
                max_retries: 1,
                initial_backoff: Duration::from_millis(500),
            },
        );
        sched.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exclusive_section_waits_for_running_job() {
        let sched = scheduler(0);
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let l = log.clone();
        sched.enqueue(
            "slow",
            job(move || {
                let l = l.clone();
                async move {
                    l.lock().unwrap().push("job-start");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    l.lock().unwrap().push("job-end");
                    Ok(())
                }
            }),
        );
        // Let the drain task pick up the job.
        tokio::time::sleep(Duration::from_millis(1)).await;

        let l = log.clone();
        sched
            .run_exclusive(async move {
                l.lock().unwrap().push("exclusive");
            })
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["job-start", "job-end", "exclusive"]);
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_empty() {
        scheduler(3).wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_is_dropped_and_queue_keeps_draining() {
        fn explode() -> Result<()> {
            panic!("bad event payload")
        }

        let sched = scheduler(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let next_ran = Arc::new(AtomicBool::new(false));

        let count = attempts.clone();
        sched.enqueue(
            "panics",
            job(move || {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    explode()
                }
            }),
        );
        let flag = next_ran.clone();
        sched.enqueue(
            "next",
            job(move || {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        sched.wait_idle().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(next_ran.load(Ordering::SeqCst));
        let stats = sched.snapshot();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.retried, 0);
        assert!(!stats.running);
        assert_eq!(stats.queued, 0);
    }
}
