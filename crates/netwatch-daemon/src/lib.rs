//! netwatch-daemon: Job scheduling and execution for the netwatch engine.
//!
//! Periodic and on-demand triggers become [`job::Job`]s keyed by
//! (kind, target). The [`queue::JobQueue`] drops a trigger whose key is
//! already queued or running; the [`worker::WorkerPool`] executes jobs with
//! bounded concurrency and retries transient failures with backoff.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use api::NetwatchApi;
pub use config::NetwatchConfig;
pub use engine::{Engine, RunningEngine, Transports};
pub use error::{ApiError, EngineError, JobError};
