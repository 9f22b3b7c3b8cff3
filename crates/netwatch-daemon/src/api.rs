//! Boundary API.
//!
//! Transport-agnostic operations for an outer HTTP or RPC layer. Inputs
//! arrive as text and are validated here; callers are assumed to be
//! authenticated already.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use netwatch_core::types::{parse_address, parse_subnet};
use netwatch_core::{Device, DeviceStatus, InterfaceSample, MacAddress, MetricSample, ScanRun};
use netwatch_discover::scanner::validate_subnet;
use netwatch_monitor::MetricCollector;
use netwatch_store::{DeviceTracker, Store};

use crate::error::ApiError;
use crate::job::{JobKey, Trigger};
use crate::queue::{DropReason, JobQueue, Submission};

type Result<T> = std::result::Result<T, ApiError>;

/// Manual registration request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDevice {
    pub address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub vendor: Option<String>,
    pub device_class: Option<String>,
}

/// Job ids of a forced check. `None` means that half was already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckTicket {
    pub availability: Option<Uuid>,
    pub metrics: Option<Uuid>,
}

#[derive(Clone)]
pub struct NetwatchApi {
    queue: JobQueue,
    tracker: Arc<DeviceTracker>,
    collector: Option<Arc<MetricCollector>>,
    metrics_limit: usize,
    interfaces_limit: usize,
}

impl NetwatchApi {
    pub fn new(
        queue: JobQueue,
        tracker: Arc<DeviceTracker>,
        metrics_limit: usize,
        interfaces_limit: usize,
    ) -> Self {
        Self {
            queue,
            tracker,
            collector: None,
            metrics_limit,
            interfaces_limit,
        }
    }

    /// Deleted devices also lose their interface counter history here.
    pub fn with_collector(mut self, collector: Arc<MetricCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.tracker.store()
    }

    // ── Scans ────────────────────────────────────────────────────

    /// Queue a scan of `subnet`. The returned id is the ScanRun id to poll.
    pub async fn trigger_scan(&self, subnet: &str) -> Result<Uuid> {
        let subnet = parse_subnet(subnet)?;
        validate_subnet(&subnet)?;
        let key = JobKey::discovery(subnet);
        let scan_id = accept(key, self.queue.submit(key, Trigger::OnDemand))?;
        tracing::info!(subnet = %subnet, scan_id = %scan_id, "Scan requested");
        Ok(scan_id)
    }

    /// A scan run by id. Not found until the worker has started the scan.
    pub async fn get_scan_run(&self, id: Uuid) -> Result<ScanRun> {
        self.store()
            .get_scan_run(id)
            .await?
            .ok_or(ApiError::ScanNotFound(id))
    }

    pub async fn list_scan_runs(&self, limit: usize) -> Result<Vec<ScanRun>> {
        Ok(self.store().list_scan_runs(limit).await?)
    }

    // ── Devices ──────────────────────────────────────────────────

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.store().list_active_devices().await?)
    }

    pub async fn get_device(&self, address: &str) -> Result<Device> {
        let address = parse_address(address)?;
        self.device(address).await
    }

    pub async fn create_device(&self, request: NewDevice) -> Result<Device> {
        let address = parse_address(&request.address)?;
        let mac_address = request
            .mac_address
            .as_deref()
            .map(str::parse::<MacAddress>)
            .transpose()?;

        let mut device = Device::new(address, Utc::now());
        device.mac_address = mac_address;
        device.hostname = request.hostname;
        device.vendor = request.vendor;
        device.device_class = request.device_class;
        Ok(self.tracker.create_device(&device).await?)
    }

    pub async fn delete_device(&self, address: &str) -> Result<()> {
        let address = parse_address(address)?;
        if self.tracker.delete_device(address).await? {
            if let Some(collector) = &self.collector {
                collector.forget(address);
            }
            tracing::info!(address = %address, "Device deleted");
            Ok(())
        } else {
            Err(ApiError::DeviceNotFound(address))
        }
    }

    // ── Monitoring ───────────────────────────────────────────────

    /// Latest status, or `None` if the device has not been checked yet.
    pub async fn device_status(&self, address: &str) -> Result<Option<DeviceStatus>> {
        let address = parse_address(address)?;
        self.device(address).await?;
        Ok(self.store().get_device_status(address).await?)
    }

    /// Newest metric samples first.
    pub async fn device_metrics(
        &self,
        address: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MetricSample>> {
        let address = parse_address(address)?;
        self.device(address).await?;
        let limit = limit.unwrap_or(self.metrics_limit);
        Ok(self.store().query_metrics(address, limit).await?)
    }

    /// Newest interface samples first.
    pub async fn device_interfaces(
        &self,
        address: &str,
        limit: Option<usize>,
    ) -> Result<Vec<InterfaceSample>> {
        let address = parse_address(address)?;
        self.device(address).await?;
        let limit = limit.unwrap_or(self.interfaces_limit);
        Ok(self.store().query_interface_status(address, limit).await?)
    }

    /// Queue an availability check and a metric collection right away.
    pub async fn check_now(&self, address: &str) -> Result<CheckTicket> {
        let address = parse_address(address)?;
        self.device(address).await?;

        let availability = self
            .queue
            .submit(JobKey::availability(address), Trigger::OnDemand);
        let metrics = self.queue.submit(JobKey::metrics(address), Trigger::OnDemand);
        for submission in [availability, metrics] {
            if let Submission::Dropped(reason @ (DropReason::QueueFull | DropReason::Closed)) =
                submission
            {
                return Err(unavailable(reason));
            }
        }

        let ticket = CheckTicket {
            availability: enqueued(availability),
            metrics: enqueued(metrics),
        };
        tracing::info!(address = %address, "Immediate check requested");
        Ok(ticket)
    }

    async fn device(&self, address: IpAddr) -> Result<Device> {
        self.store()
            .get_device(address)
            .await?
            .ok_or(ApiError::DeviceNotFound(address))
    }
}

fn enqueued(submission: Submission) -> Option<Uuid> {
    match submission {
        Submission::Enqueued(id) => Some(id),
        Submission::Dropped(_) => None,
    }
}

fn accept(key: JobKey, submission: Submission) -> Result<Uuid> {
    match submission {
        Submission::Enqueued(id) => Ok(id),
        Submission::Dropped(DropReason::InFlight(job_id)) => Err(ApiError::Busy {
            kind: key.kind,
            target: key.target.to_string(),
            job_id,
        }),
        Submission::Dropped(reason) => Err(unavailable(reason)),
    }
}

fn unavailable(reason: DropReason) -> ApiError {
    match reason {
        DropReason::QueueFull => ApiError::QueueUnavailable("queue is full"),
        _ => ApiError::QueueUnavailable("queue is closed"),
    }
}
