//! Periodic triggers.
//!
//! One timer per configured subnet for discovery, plus one timer each for
//! availability checks and metric collection over the active inventory.
//! Every tick only submits to the [`JobQueue`]; a key still queued or
//! running is skipped there, and missed ticks are not replayed.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use netwatch_core::types::parse_subnet;
use netwatch_discover::config::DiscoverConfig;
use netwatch_discover::scanner::validate_subnet;
use netwatch_monitor::config::MonitorConfig;
use netwatch_store::{Store, StoreError};

use crate::error::EngineError;
use crate::job::{JobKey, JobKind, Trigger};
use crate::queue::{JobQueue, Submission};

/// A subnet swept on a fixed cadence.
#[derive(Debug, Clone)]
pub struct ScheduledSubnet {
    pub subnet: IpNet,
    pub name: Option<String>,
    pub every: Duration,
}

pub struct Scheduler {
    queue: JobQueue,
    store: Arc<dyn Store>,
    subnets: Vec<ScheduledSubnet>,
    availability_every: Duration,
    metrics_every: Duration,
}

impl Scheduler {
    /// Validates every enabled subnet up front; disabled ones are skipped.
    pub fn new(
        queue: JobQueue,
        store: Arc<dyn Store>,
        discover: &DiscoverConfig,
        monitor: &MonitorConfig,
    ) -> Result<Self, EngineError> {
        let mut subnets = Vec::new();
        for schedule in &discover.subnets {
            if !schedule.enabled {
                tracing::info!(cidr = %schedule.cidr, "Subnet disabled, skipping");
                continue;
            }
            let subnet = parse_subnet(&schedule.cidr)?;
            validate_subnet(&subnet)?;
            subnets.push(ScheduledSubnet {
                subnet,
                name: schedule.name.clone(),
                every: Duration::from_secs(schedule.interval_secs.max(1)),
            });
        }

        Ok(Self {
            queue,
            store,
            subnets,
            availability_every: monitor.availability_interval().max(Duration::from_secs(1)),
            metrics_every: monitor.metrics_interval().max(Duration::from_secs(1)),
        })
    }

    pub fn subnets(&self) -> &[ScheduledSubnet] {
        &self.subnets
    }

    /// Run every timer until the task is aborted.
    pub async fn run(self) {
        let mut timers = JoinSet::new();

        for scheduled in self.subnets.clone() {
            let queue = self.queue.clone();
            timers.spawn(subnet_timer(queue, scheduled));
        }
        timers.spawn(inventory_timer(
            self.queue.clone(),
            self.store.clone(),
            JobKind::Availability,
            self.availability_every,
        ));
        timers.spawn(inventory_timer(
            self.queue.clone(),
            self.store.clone(),
            JobKind::Metrics,
            self.metrics_every,
        ));

        tracing::info!(
            subnet_count = self.subnets.len(),
            availability_secs = self.availability_every.as_secs(),
            metrics_secs = self.metrics_every.as_secs(),
            "Scheduler started"
        );

        while let Some(joined) = timers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Scheduler timer stopped");
            }
        }
    }
}

/// First sweep fires immediately.
async fn subnet_timer(queue: JobQueue, scheduled: ScheduledSubnet) {
    let mut ticker = interval(scheduled.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let submission = queue.submit(JobKey::discovery(scheduled.subnet), Trigger::Periodic);
        if let Submission::Enqueued(scan_id) = submission {
            tracing::info!(
                cidr = %scheduled.subnet,
                name = scheduled.name.as_deref().unwrap_or_default(),
                scan_id = %scan_id,
                "Scheduled scan triggered"
            );
        }
    }
}

/// First round fires one period after start.
async fn inventory_timer(queue: JobQueue, store: Arc<dyn Store>, kind: JobKind, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = enqueue_inventory(&queue, store.as_ref(), kind).await {
            tracing::warn!(kind = %kind, error = %e, "Could not list devices for scheduled jobs");
        }
    }
}

/// Submit one `kind` job per active device. Returns (enqueued, dropped).
pub async fn enqueue_inventory(
    queue: &JobQueue,
    store: &dyn Store,
    kind: JobKind,
) -> Result<(usize, usize), StoreError> {
    let devices = store.list_active_devices().await?;
    let mut enqueued = 0;
    let mut dropped = 0;
    for device in &devices {
        match queue.submit(device_key(kind, device.address), Trigger::Periodic) {
            Submission::Enqueued(_) => enqueued += 1,
            Submission::Dropped(_) => dropped += 1,
        }
    }
    tracing::debug!(kind = %kind, devices = devices.len(), enqueued, dropped, "Inventory jobs submitted");
    Ok((enqueued, dropped))
}

fn device_key(kind: JobKind, address: IpAddr) -> JobKey {
    match kind {
        JobKind::Metrics => JobKey::metrics(address),
        _ => JobKey::availability(address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use netwatch_core::Device;
    use netwatch_discover::config::SubnetSchedule;
    use netwatch_store::MemoryStore;

    use crate::queue::JobState;

    fn schedule(cidr: &str, enabled: bool) -> SubnetSchedule {
        SubnetSchedule {
            cidr: cidr.to_string(),
            name: None,
            interval_secs: 300,
            enabled,
        }
    }

    #[test]
    fn test_rejects_bad_subnets_up_front() {
        let (queue, _rx) = JobQueue::new(4);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut discover = DiscoverConfig::default();

        discover.subnets = vec![schedule("10.0.0.0/24", true), schedule("bogus", false)];
        let scheduler =
            Scheduler::new(queue.clone(), store.clone(), &discover, &MonitorConfig::default())
                .unwrap();
        assert_eq!(scheduler.subnets().len(), 1);

        discover.subnets = vec![schedule("bogus", true)];
        assert!(Scheduler::new(queue.clone(), store.clone(), &discover, &MonitorConfig::default()).is_err());

        discover.subnets = vec![schedule("10.0.0.0/8", true)];
        assert!(Scheduler::new(queue, store, &discover, &MonitorConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_inventory_round_skips_in_flight_keys() {
        let (queue, _rx) = JobQueue::new(16);
        let store = MemoryStore::new();
        for last in 1..=3u8 {
            let device = Device::new(IpAddr::from([10, 0, 0, last]), Utc::now());
            store.upsert_device(&device).await.unwrap();
        }

        assert_eq!(
            enqueue_inventory(&queue, &store, JobKind::Availability).await.unwrap(),
            (3, 0)
        );
        // Nothing has run yet, so the next tick is dropped entirely.
        assert_eq!(
            enqueue_inventory(&queue, &store, JobKind::Availability).await.unwrap(),
            (0, 3)
        );
        // Metrics keys are independent of availability keys.
        assert_eq!(
            enqueue_inventory(&queue, &store, JobKind::Metrics).await.unwrap(),
            (3, 0)
        );
        let key = JobKey::metrics(IpAddr::from([10, 0, 0, 1]));
        assert_eq!(queue.state(&key), Some(JobState::Queued));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnet_timer_submits_each_period() {
        let (queue, mut rx) = JobQueue::new(16);
        let scheduled = ScheduledSubnet {
            subnet: "10.0.0.0/30".parse().unwrap(),
            name: None,
            every: Duration::from_secs(300),
        };
        let timer = tokio::spawn(subnet_timer(queue.clone(), scheduled));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.trigger, Trigger::Periodic);
        queue.registry().release(&first.key);

        tokio::time::advance(Duration::from_secs(301)).await;
        let second = rx.recv().await.unwrap();
        assert_ne!(first.id, second.id);
        timer.abort();
    }
}
