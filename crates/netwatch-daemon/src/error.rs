//! Error types for the netwatch-daemon crate.

use std::net::IpAddr;

use thiserror::Error;
use uuid::Uuid;

use netwatch_core::NetwatchError;
use netwatch_discover::DiscoverError;
use netwatch_monitor::MonitorError;
use netwatch_store::StoreError;

use crate::job::JobKind;

/// Why a job attempt failed. Only `Transient` is retried.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Job failed: {0}")]
    Failed(String),
}

impl JobError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            Self::Transient(e.to_string())
        } else {
            Self::Failed(e.to_string())
        }
    }
}

impl From<DiscoverError> for JobError {
    fn from(e: DiscoverError) -> Self {
        let message = e.to_string();
        match e {
            DiscoverError::Store(e) => e.into(),
            DiscoverError::SubnetTooLarge { subnet, .. } => Self::InvalidTarget {
                target: subnet,
                reason: message,
            },
            DiscoverError::VendorTable { .. } => Self::Failed(message),
            DiscoverError::ProbeUnavailable(_)
            | DiscoverError::Probe(_)
            | DiscoverError::NoInterface { .. }
            | DiscoverError::Link(_)
            | DiscoverError::Io(_) => Self::Transient(message),
        }
    }
}

impl From<MonitorError> for JobError {
    fn from(e: MonitorError) -> Self {
        let message = e.to_string();
        match e {
            MonitorError::Precheck(e) => e.into(),
            MonitorError::Timeout { .. } | MonitorError::Io(_) => Self::Transient(message),
            MonitorError::ErrorStatus { .. }
            | MonitorError::Decode(_)
            | MonitorError::InvalidOid(_) => Self::Failed(message),
        }
    }
}

/// Errors returned by the boundary API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Invalid(#[from] NetwatchError),

    #[error(transparent)]
    Discover(#[from] DiscoverError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Device not found: {0}")]
    DeviceNotFound(IpAddr),

    #[error("Scan run not found: {0}")]
    ScanNotFound(Uuid),

    #[error("A {kind} job for {target} is already queued or running")]
    Busy {
        kind: JobKind,
        target: String,
        job_id: Uuid,
    },

    #[error("Job queue unavailable: {0}")]
    QueueUnavailable(&'static str),
}

/// Errors raised while assembling the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] NetwatchError),

    #[error(transparent)]
    Discover(#[from] DiscoverError),
}

pub type Result<T> = std::result::Result<T, JobError>;
