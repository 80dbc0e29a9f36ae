//! Bounded-concurrency job admission.
//!
//! At most `capacity` replay jobs run at once; excess submissions wait in
//! FIFO order. Duplicate submissions for the same test are admitted and
//! queued independently -- the registry performs no coalescing. The active
//! set and queue live behind one mutex because jobs complete on arbitrary
//! runtime worker threads.
//!
//! Status writes for one job are ordered: the queued record is written by a
//! task whose handle travels with the queue entry, and the run task awaits it
//! before writing the running record. The store is last-write-wins, so an
//! unsequenced queued write could otherwise land after the final record.

use crate::schedule::launcher::RunLauncher;
use crate::status::{RunStatus, StatusStore};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

pub struct Limiter {
    capacity: usize,
    launcher: Arc<dyn RunLauncher>,
    status: Arc<dyn StatusStore>,
    state: Mutex<LimiterState>,
}

struct QueuedJob {
    test_name: String,
    queued_write: JoinHandle<()>,
}

#[derive(Default)]
struct LimiterState {
    active: HashMap<Uuid, String>,
    queue: VecDeque<QueuedJob>,
}

impl Limiter {
    pub fn new(
        capacity: usize,
        launcher: Arc<dyn RunLauncher>,
        status: Arc<dyn StatusStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            // A zero capacity would queue every job forever.
            capacity: capacity.max(1),
            launcher,
            status,
            state: Mutex::new(LimiterState::default()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }

    /// Tests waiting for a slot, in dequeue order.
    pub fn queued(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .queue
            .iter()
            .map(|job| job.test_name.clone())
            .collect()
    }

    /// Admit a job: start immediately when a slot is free, otherwise queue.
    pub fn submit(self: &Arc<Self>, test_name: &str) {
        let started = {
            let mut state = self.state.lock().unwrap();
            if state.active.len() < self.capacity {
                let id = Uuid::new_v4();
                state.active.insert(id, test_name.to_string());
                Some(id)
            } else {
                info!(test = %test_name, "capacity reached, queueing");
                let queued_write = self.write_status(test_name.to_string(), RunStatus::Queued);
                state.queue.push_back(QueuedJob {
                    test_name: test_name.to_string(),
                    queued_write,
                });
                None
            }
        };
        if let Some(id) = started {
            self.spawn_run(id, test_name.to_string(), None);
        }
    }

    fn spawn_run(self: &Arc<Self>, id: Uuid, test_name: String, after: Option<JoinHandle<()>>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(write) = after {
                let _ = write.await;
            }
            if let Err(e) = this.status.write(&test_name, RunStatus::Running).await {
                error!(test = %test_name, error = %e, "failed to write run status");
            }
            let outcome = this.launcher.launch(&test_name).await;
            if let Err(e) = this.status.write(&test_name, outcome).await {
                error!(test = %test_name, error = %e, "failed to write final status");
            }
            info!(test = %test_name, status = %outcome, "run finished");
            this.release(id);
        });
    }

    /// Release a finished job's slot and, when the queue is non-empty, start
    /// its head.
    fn release(self: &Arc<Self>, id: Uuid) {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.active.remove(&id);
            state.queue.pop_front().map(|job| {
                let next_id = Uuid::new_v4();
                state.active.insert(next_id, job.test_name.clone());
                (next_id, job)
            })
        };
        if let Some((next_id, job)) = next {
            info!(test = %job.test_name, "dequeued");
            self.spawn_run(next_id, job.test_name, Some(job.queued_write));
        }
    }

    fn write_status(&self, test_name: String, status: RunStatus) -> JoinHandle<()> {
        let store = Arc::clone(&self.status);
        tokio::spawn(async move {
            if let Err(e) = store.write(&test_name, status).await {
                error!(test = %test_name, error = %e, "failed to write run status");
            }
        })
    }
}
