//! Worker pool.
//!
//! Pulls jobs off the queue and runs up to `max_concurrent` at once. Each
//! job runs on its own task so a panic is caught at the task boundary and
//! reported like any other failure. Transient errors are retried with
//! exponential backoff while the job's key stays in the running state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::WorkerConfig;
use crate::error::{JobError, Result};
use crate::job::{Job, JobKey};
use crate::queue::{JobReceiver, Registry};

/// Executes jobs of every kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<()>;

    /// Called once for a job that is given up on.
    async fn on_failed(&self, job: &Job, error: &JobError);
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

pub struct WorkerPool {
    registry: Registry,
    handler: Arc<dyn JobHandler>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl WorkerPool {
    pub fn new(
        registry: Registry,
        handler: Arc<dyn JobHandler>,
        max_concurrent: usize,
        retry: RetryPolicy,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            registry,
            handler,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            retry,
        }
    }

    /// Run until every [`JobQueue`](crate::queue::JobQueue) handle is
    /// dropped, then drain running jobs.
    pub async fn run(self, mut receiver: JobReceiver) {
        tracing::info!(max_concurrent = self.max_concurrent, "Worker pool started");
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                job = receiver.recv() => {
                    let Some(job) = job else { break };
                    let Ok(permit) = self.permits.clone().acquire_owned().await else {
                        break;
                    };
                    self.registry.mark_running(&job.key);
                    let registry = self.registry.clone();
                    let handler = self.handler.clone();
                    let retry = self.retry;
                    running.spawn(async move {
                        let _permit = permit;
                        run_job(registry, handler, retry, job).await;
                    });
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Worker task aborted");
                    }
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task aborted");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

/// Returns the key to idle however the job ends.
struct Release {
    registry: Registry,
    key: JobKey,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

async fn run_job(registry: Registry, handler: Arc<dyn JobHandler>, retry: RetryPolicy, job: Job) {
    let _release = Release {
        registry,
        key: job.key,
    };
    let started = Instant::now();
    let mut attempt = 1;

    let outcome = loop {
        match execute_guarded(&handler, &job).await {
            Ok(()) => break Ok(()),
            Err(e) if e.is_retriable() && attempt < retry.max_attempts => {
                let delay = retry.backoff(attempt);
                tracing::warn!(
                    job_id = %job.id,
                    key = %job.key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Job attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => break Err(e),
        }
    };

    match outcome {
        Ok(()) => tracing::debug!(
            job_id = %job.id,
            key = %job.key,
            attempts = attempt,
            duration_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        ),
        Err(e) => {
            tracing::error!(
                job_id = %job.id,
                key = %job.key,
                attempts = attempt,
                error = %e,
                "Job failed"
            );
            handler.on_failed(&job, &e).await;
        }
    }
}

async fn execute_guarded(handler: &Arc<dyn JobHandler>, job: &Job) -> Result<()> {
    let handler = handler.clone();
    let job = job.clone();
    match tokio::spawn(async move { handler.execute(&job).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(JobError::Failed("job panicked".to_string())),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}
