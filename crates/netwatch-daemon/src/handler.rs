//! Job execution against the discovery and monitoring components.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ipnet::IpNet;

use netwatch_core::{CheckOutcome, ScanRun, ScanStatus};
use netwatch_discover::{DiscoveryOrchestrator, LivenessProber, ProbeOutcome};
use netwatch_monitor::MetricCollector;
use netwatch_store::DeviceTracker;

use crate::error::{JobError, Result};
use crate::job::{Job, JobKind, Target};
use crate::worker::JobHandler;

pub struct EngineHandler {
    orchestrator: Arc<DiscoveryOrchestrator>,
    prober: LivenessProber,
    collector: Arc<MetricCollector>,
    tracker: Arc<DeviceTracker>,
}

impl EngineHandler {
    pub fn new(
        orchestrator: Arc<DiscoveryOrchestrator>,
        prober: LivenessProber,
        collector: Arc<MetricCollector>,
        tracker: Arc<DeviceTracker>,
    ) -> Self {
        Self {
            orchestrator,
            prober,
            collector,
            tracker,
        }
    }

    async fn discover(&self, job: &Job, subnet: IpNet) -> Result<()> {
        let run = self.orchestrator.run_scan(job.id, subnet).await?;
        if run.status == ScanStatus::Failed {
            tracing::warn!(scan_id = %run.id, subnet = %subnet, "Scan recorded as failed");
        }
        Ok(())
    }

    async fn check(&self, job: &Job, address: IpAddr) -> Result<()> {
        let outcome = match self.prober.probe(address).await? {
            ProbeOutcome::Reachable(latency) => CheckOutcome::Online { latency },
            ProbeOutcome::Unreachable => CheckOutcome::Offline,
        };
        self.tracker
            .record_check(address, job.id, outcome, Utc::now())
            .await?;
        Ok(())
    }

    async fn collect(&self, job: &Job, address: IpAddr) -> Result<()> {
        let collection = self.collector.collect(address).await?;
        let written = self
            .tracker
            .record_metrics(address, job.id, &collection, Utc::now())
            .await?;
        tracing::debug!(
            address = %address,
            collection_id = %job.id,
            written,
            system_name = collection.system.name.as_deref().unwrap_or_default(),
            "Metrics recorded"
        );
        Ok(())
    }

    /// Leave a failed ScanRun behind for a discovery job that gave up, so
    /// a caller polling the scan id sees the outcome.
    async fn fail_scan(&self, job: &Job, subnet: IpNet) -> Result<()> {
        let store = self.tracker.store();
        let now = Utc::now();
        match store.get_scan_run(job.id).await? {
            Some(mut run) => {
                if run.fail(now) {
                    store.update_scan_run(&run).await?;
                }
            }
            None => {
                let mut run = ScanRun::start(job.id, subnet, now);
                run.fail(now);
                store.create_scan_run(&run).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for EngineHandler {
    async fn execute(&self, job: &Job) -> Result<()> {
        match (job.key.kind, job.key.target) {
            (JobKind::Discovery, Target::Subnet(subnet)) => self.discover(job, subnet).await,
            (JobKind::Availability, Target::Device(address)) => self.check(job, address).await,
            (JobKind::Metrics, Target::Device(address)) => self.collect(job, address).await,
            (kind, target) => Err(JobError::InvalidTarget {
                target: target.to_string(),
                reason: format!("{kind} jobs do not apply to this target"),
            }),
        }
    }

    async fn on_failed(&self, job: &Job, error: &JobError) {
        let Target::Subnet(subnet) = job.key.target else {
            return;
        };
        if let Err(e) = self.fail_scan(job, subnet).await {
            tracing::error!(
                scan_id = %job.id,
                subnet = %subnet,
                error = %e,
                cause = %error,
                "Could not mark scan run failed"
            );
        }
    }
}
