//! In-process store backed by hash maps.
//!
//! Used by the daemon when no external database is configured, and by tests.
//! Clone is cheap (inner Arc).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use netwatch_core::{Device, DeviceStatus, InterfaceSample, MetricSample, ScanRun};

use crate::store::{Result, Store, StoreError};

#[derive(Default)]
struct Tables {
    devices: HashMap<IpAddr, Device>,
    scans: HashMap<Uuid, ScanRun>,
    statuses: HashMap<IpAddr, DeviceStatus>,
    metrics: HashMap<IpAddr, Vec<MetricSample>>,
    interfaces: HashMap<IpAddr, Vec<InterfaceSample>>,
}

#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

fn newest_first<T: Clone>(
    rows: Option<&Vec<T>>,
    limit: usize,
    timestamp: impl Fn(&T) -> chrono::DateTime<chrono::Utc>,
) -> Vec<T> {
    let mut out: Vec<T> = rows
        .map(|r| r.iter().rev().cloned().collect())
        .unwrap_or_default();
    out.sort_by_key(|row| std::cmp::Reverse(timestamp(row)));
    out.truncate(limit);
    out
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_device(&self, device: &Device) -> Result<()> {
        self.check()?;
        let mut t = self.tables.write().await;
        t.devices.insert(device.address, device.clone());
        Ok(())
    }

    async fn get_device(&self, address: IpAddr) -> Result<Option<Device>> {
        self.check()?;
        Ok(self.tables.read().await.devices.get(&address).cloned())
    }

    async fn list_active_devices(&self) -> Result<Vec<Device>> {
        self.check()?;
        let t = self.tables.read().await;
        let mut devices: Vec<Device> = t.devices.values().filter(|d| d.is_active).cloned().collect();
        devices.sort_by_key(|d| d.address);
        Ok(devices)
    }

    async fn delete_device(&self, address: IpAddr) -> Result<bool> {
        self.check()?;
        let mut t = self.tables.write().await;
        t.statuses.remove(&address);
        Ok(t.devices.remove(&address).is_some())
    }

    async fn create_scan_run(&self, run: &ScanRun) -> Result<()> {
        self.check()?;
        self.tables.write().await.scans.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_scan_run(&self, run: &ScanRun) -> Result<()> {
        self.check()?;
        let mut t = self.tables.write().await;
        match t.scans.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "scan run",
                key: run.id.to_string(),
            }),
        }
    }

    async fn get_scan_run(&self, id: Uuid) -> Result<Option<ScanRun>> {
        self.check()?;
        Ok(self.tables.read().await.scans.get(&id).cloned())
    }

    async fn list_scan_runs(&self, limit: usize) -> Result<Vec<ScanRun>> {
        self.check()?;
        let t = self.tables.read().await;
        let mut runs: Vec<ScanRun> = t.scans.values().cloned().collect();
        runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn get_device_status(&self, address: IpAddr) -> Result<Option<DeviceStatus>> {
        self.check()?;
        Ok(self.tables.read().await.statuses.get(&address).cloned())
    }

    async fn upsert_device_status(&self, status: &DeviceStatus) -> Result<()> {
        self.check()?;
        let mut t = self.tables.write().await;
        t.statuses.insert(status.address, status.clone());
        Ok(())
    }

    async fn append_metric_sample(&self, sample: &MetricSample) -> Result<()> {
        self.check()?;
        let mut t = self.tables.write().await;
        t.metrics.entry(sample.address).or_default().push(sample.clone());
        Ok(())
    }

    async fn append_interface_sample(&self, sample: &InterfaceSample) -> Result<()> {
        self.check()?;
        let mut t = self.tables.write().await;
        t.interfaces.entry(sample.address).or_default().push(sample.clone());
        Ok(())
    }

    async fn query_metrics(&self, address: IpAddr, limit: usize) -> Result<Vec<MetricSample>> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(newest_first(t.metrics.get(&address), limit, |s| s.timestamp))
    }

    async fn query_interface_status(
        &self,
        address: IpAddr,
        limit: usize,
    ) -> Result<Vec<InterfaceSample>> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(newest_first(t.interfaces.get(&address), limit, |s| s.timestamp))
    }

    async fn collection_metrics(
        &self,
        address: IpAddr,
        collection_id: Uuid,
    ) -> Result<Vec<MetricSample>> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(t.metrics
            .get(&address)
            .into_iter()
            .flatten()
            .filter(|s| s.collection_id == collection_id)
            .cloned()
            .collect())
    }

    async fn collection_interfaces(
        &self,
        address: IpAddr,
        collection_id: Uuid,
    ) -> Result<Vec<InterfaceSample>> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(t.interfaces
            .get(&address)
            .into_iter()
            .flatten()
            .filter(|s| s.collection_id == collection_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use netwatch_core::{MetricCategory, MetricUnit, ScanStatus};

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_device_crud() {
        let store = MemoryStore::new();
        let device = Device::new(addr("10.0.0.1"), Utc::now());

        assert!(store.get_device(device.address).await.unwrap().is_none());
        store.upsert_device(&device).await.unwrap();
        assert_eq!(store.list_active_devices().await.unwrap().len(), 1);

        let mut inactive = device.clone();
        inactive.is_active = false;
        store.upsert_device(&inactive).await.unwrap();
        assert!(store.list_active_devices().await.unwrap().is_empty());
        assert!(store.get_device(device.address).await.unwrap().is_some());

        assert!(store.delete_device(device.address).await.unwrap());
        assert!(!store.delete_device(device.address).await.unwrap());
    }

    #[tokio::test]
    async fn test_metrics_newest_first_with_limit() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for i in 0..5 {
            let sample = MetricSample {
                address: addr("10.0.0.1"),
                collection_id: Uuid::new_v4(),
                category: MetricCategory::System,
                name: "cpu_usage".to_string(),
                value: i as f64,
                unit: MetricUnit::Percent,
                timestamp: base + TimeDelta::seconds(i),
            };
            store.append_metric_sample(&sample).await.unwrap();
        }

        let rows = store.query_metrics(addr("10.0.0.1"), 3).await.unwrap();
        let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![4.0, 3.0, 2.0]);
        assert!(store.query_metrics(addr("10.0.0.2"), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collection_metrics_ignores_row_limit() {
        let store = MemoryStore::new();
        let target = Uuid::new_v4();
        let base = Utc::now();
        for i in 0..6 {
            let sample = MetricSample {
                address: addr("10.0.0.1"),
                collection_id: if i < 2 { target } else { Uuid::new_v4() },
                category: MetricCategory::System,
                name: format!("metric_{i}"),
                value: i as f64,
                unit: MetricUnit::Percent,
                timestamp: base + TimeDelta::seconds(i),
            };
            store.append_metric_sample(&sample).await.unwrap();
        }

        let rows = store.collection_metrics(addr("10.0.0.1"), target).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.collection_id == target));
        assert!(store
            .collection_interfaces(addr("10.0.0.1"), target)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_scan_run_is_not_found() {
        let store = MemoryStore::new();
        let run = ScanRun::start(Uuid::new_v4(), "10.0.0.0/30".parse().unwrap(), Utc::now());
        let err = store.update_scan_run(&run).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        store.create_scan_run(&run).await.unwrap();
        let fetched = store.get_scan_run(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ScanStatus::Running);
    }

    #[tokio::test]
    async fn test_outage_is_transient() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.list_active_devices().await.unwrap_err();
        assert!(err.is_transient());
        store.set_available(true);
        assert!(store.list_active_devices().await.is_ok());
    }
}
