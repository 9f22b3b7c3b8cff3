//! Bounded job queue with a per-key dedup registry.
//!
//! Each key moves idle → queued → running → idle. A submission for a key
//! that is queued or running is dropped, never buffered, so periodic
//! triggers cannot pile up faster than jobs complete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::job::{Job, JobKey, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A job with the same key is queued or running; carries its id.
    InFlight(Uuid),
    QueueFull,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Enqueued(Uuid),
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    job_id: Uuid,
    state: JobState,
}

/// Per-key state shared by producers and the worker pool. Holds no sender,
/// so it does not keep the channel open.
#[derive(Clone, Default)]
pub struct Registry {
    slots: Arc<Mutex<HashMap<JobKey, Slot>>>,
}

impl Registry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state of `key`; `None` means idle.
    pub fn state(&self, key: &JobKey) -> Option<JobState> {
        self.lock().get(key).map(|s| s.state)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn mark_running(&self, key: &JobKey) {
        if let Some(slot) = self.lock().get_mut(key) {
            slot.state = JobState::Running;
        }
    }

    pub(crate) fn release(&self, key: &JobKey) {
        self.lock().remove(key);
    }
}

/// Producer side. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    registry: Registry,
}

/// Consumer side, owned by the worker pool.
pub struct JobReceiver {
    rx: mpsc::Receiver<Job>,
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            registry: Registry::default(),
        };
        (queue, JobReceiver { rx })
    }

    /// Enqueue a job for `key` unless one is already in flight.
    pub fn submit(&self, key: JobKey, trigger: Trigger) -> Submission {
        let mut slots = self.registry.lock();
        if let Some(slot) = slots.get(&key) {
            tracing::debug!(
                key = %key,
                job_id = %slot.job_id,
                state = ?slot.state,
                trigger = ?trigger,
                "Trigger dropped, job in flight"
            );
            return Submission::Dropped(DropReason::InFlight(slot.job_id));
        }

        let job = Job::new(key, trigger);
        let job_id = job.id;
        match self.tx.try_send(job) {
            Ok(()) => {
                slots.insert(
                    key,
                    Slot {
                        job_id,
                        state: JobState::Queued,
                    },
                );
                tracing::debug!(key = %key, job_id = %job_id, trigger = ?trigger, "Job enqueued");
                Submission::Enqueued(job_id)
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(key = %key, "Job queue full, trigger dropped");
                Submission::Dropped(DropReason::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Submission::Dropped(DropReason::Closed),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self, key: &JobKey) -> Option<JobState> {
        self.registry.state(key)
    }

    pub fn in_flight(&self) -> usize {
        self.registry.in_flight()
    }
}
