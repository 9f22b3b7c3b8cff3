//! The persistence interface consumed by the engine.

use std::net::IpAddr;

use async_trait::async_trait;
use uuid::Uuid;

use netwatch_core::{Device, DeviceStatus, InterfaceSample, MetricSample, ScanRun};

/// Errors from persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Abstract device, scan, status, and time-series storage.
///
/// Query methods returning samples order them newest first.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Devices ──────────────────────────────────────────────────

    /// Insert or replace the device keyed by its address.
    async fn upsert_device(&self, device: &Device) -> Result<()>;

    async fn get_device(&self, address: IpAddr) -> Result<Option<Device>>;

    async fn list_active_devices(&self) -> Result<Vec<Device>>;

    /// Remove the device and its status row. Returns false if it did not exist.
    async fn delete_device(&self, address: IpAddr) -> Result<bool>;

    // ── Scan runs ────────────────────────────────────────────────

    /// Create a scan run. Creating an id that already exists replaces it.
    async fn create_scan_run(&self, run: &ScanRun) -> Result<()>;

    async fn update_scan_run(&self, run: &ScanRun) -> Result<()>;

    async fn get_scan_run(&self, id: Uuid) -> Result<Option<ScanRun>>;

    async fn list_scan_runs(&self, limit: usize) -> Result<Vec<ScanRun>>;

    // ── Status ───────────────────────────────────────────────────

    async fn get_device_status(&self, address: IpAddr) -> Result<Option<DeviceStatus>>;

    async fn upsert_device_status(&self, status: &DeviceStatus) -> Result<()>;

    // ── Time series ──────────────────────────────────────────────

    async fn append_metric_sample(&self, sample: &MetricSample) -> Result<()>;

    async fn append_interface_sample(&self, sample: &InterfaceSample) -> Result<()>;

    async fn query_metrics(&self, address: IpAddr, limit: usize) -> Result<Vec<MetricSample>>;

    async fn query_interface_status(
        &self,
        address: IpAddr,
        limit: usize,
    ) -> Result<Vec<InterfaceSample>>;

    /// Every metric sample stored under one collection id, unbounded.
    async fn collection_metrics(
        &self,
        address: IpAddr,
        collection_id: Uuid,
    ) -> Result<Vec<MetricSample>>;

    /// Every interface sample stored under one collection id, unbounded.
    async fn collection_interfaces(
        &self,
        address: IpAddr,
        collection_id: Uuid,
    ) -> Result<Vec<InterfaceSample>>;
}
