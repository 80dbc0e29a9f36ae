//! Job scheduling: per-test repeating triggers feeding the concurrency
//! limiter.
//!
//! The registry is an explicit object with an injected clock and an explicit
//! shutdown, so multiple instances can coexist in tests; there is no ambient
//! state. Cancelling a schedule stops future triggers only -- an in-flight
//! replay is never aborted.

pub mod launcher;
pub mod limiter;

pub use launcher::{ProcessLauncher, RunLauncher};
pub use limiter::Limiter;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Registry entry for one scheduled test. Owned exclusively by the registry;
/// the timer task only reads the test name.
struct ScheduledJob {
    interval: Duration,
    scheduled_at: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    timer: JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct JobInfo {
    pub test_name: String,
    pub interval: Duration,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    limiter: Arc<Limiter>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl SchedulerInner {
    /// One scheduled trigger: stamp `last_run`, hand the job to the limiter.
    fn trigger(&self, test_name: &str) {
        info!(test = %test_name, "scheduled trigger");
        {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.get_mut(test_name) {
                job.last_run = Some(self.clock.now());
            }
        }
        self.limiter.submit(test_name);
    }

    fn next_run(&self, job: &ScheduledJob) -> Option<DateTime<Utc>> {
        let base = job.last_run.unwrap_or(job.scheduled_at);
        chrono::Duration::from_std(job.interval)
            .ok()
            .map(|d| base + d)
    }
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, limiter: Arc<Limiter>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                limiter,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn limiter(&self) -> Arc<Limiter> {
        Arc::clone(&self.inner.limiter)
    }

    /// Create or replace the repeating trigger for a test.
    pub fn schedule(&self, test_name: &str, every: Duration) {
        let inner = Arc::clone(&self.inner);
        let name = test_name.to_string();
        let timer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                inner.trigger(&name);
            }
        });

        let job = ScheduledJob {
            interval: every,
            scheduled_at: self.inner.clock.now(),
            last_run: None,
            timer,
        };
        let mut jobs = self.inner.jobs.lock().unwrap();
        if let Some(previous) = jobs.insert(test_name.to_string(), job) {
            previous.timer.abort();
            info!(test = %test_name, "existing schedule replaced");
        } else {
            info!(test = %test_name, every = ?every, "schedule created");
        }
    }

    /// Stop future triggers for a test. Returns whether a schedule existed.
    /// Any in-flight run keeps going; there is no forced termination.
    pub fn cancel(&self, test_name: &str) -> bool {
        let removed = self.inner.jobs.lock().unwrap().remove(test_name);
        match removed {
            Some(job) => {
                job.timer.abort();
                info!(test = %test_name, "schedule cancelled");
                true
            }
            None => false,
        }
    }

    /// `(last_run ?? scheduled_at) + interval`, or None when unscheduled.
    pub fn next_run_time(&self, test_name: &str) -> Option<DateTime<Utc>> {
        let jobs = self.inner.jobs.lock().unwrap();
        jobs.get(test_name).and_then(|job| self.inner.next_run(job))
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        let jobs = self.inner.jobs.lock().unwrap();
        let mut list: Vec<JobInfo> = jobs
            .iter()
            .map(|(name, job)| JobInfo {
                test_name: name.clone(),
                interval: job.interval,
                last_run: job.last_run,
                next_run: self.inner.next_run(job),
            })
            .collect();
        list.sort_by(|a, b| a.test_name.cmp(&b.test_name));
        list
    }

    /// Fire a trigger immediately, outside the timer cadence.
    pub fn trigger_now(&self, test_name: &str) {
        self.inner.trigger(test_name);
    }

    /// Abort all timers. In-flight runs complete on their own.
    pub fn shutdown(&self) {
        let mut jobs = self.inner.jobs.lock().unwrap();
        for (_, job) in jobs.drain() {
            job.timer.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
