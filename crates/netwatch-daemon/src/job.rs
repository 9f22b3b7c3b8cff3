//! Jobs and their dedup keys.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Discovery,
    Availability,
    Metrics,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discovery => "discovery",
            Self::Availability => "availability",
            Self::Metrics => "metrics",
        })
    }
}

/// What a job operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Target {
    Subnet(IpNet),
    Device(IpAddr),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subnet(net) => write!(f, "{net}"),
            Self::Device(addr) => write!(f, "{addr}"),
        }
    }
}

/// Dedup key: at most one job per key is queued or running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobKey {
    pub kind: JobKind,
    pub target: Target,
}

impl JobKey {
    pub fn discovery(subnet: IpNet) -> Self {
        Self {
            kind: JobKind::Discovery,
            target: Target::Subnet(subnet.trunc()),
        }
    }

    pub fn availability(address: IpAddr) -> Self {
        Self {
            kind: JobKind::Availability,
            target: Target::Device(address),
        }
    }

    pub fn metrics(address: IpAddr) -> Self {
        Self {
            kind: JobKind::Metrics,
            target: Target::Device(address),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Periodic,
    OnDemand,
}

/// One unit of work. The id is fixed at trigger time and reused for every
/// attempt, so downstream writes can recognise a redelivery.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub key: JobKey,
    pub trigger: Trigger,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(key: JobKey, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            trigger,
            enqueued_at: Utc::now(),
        }
    }
}
