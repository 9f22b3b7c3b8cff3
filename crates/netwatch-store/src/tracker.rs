//! Device state tracker: the only writer of device and status rows.
//!
//! Device and status writes for the same address are serialized through a
//! per-address async mutex; writes for different addresses proceed in
//! parallel. Metric writes use their own locks and never wait on a status
//! update. Every write
//! carries the id of the job that produced it so a redelivered job is a
//! no-op instead of a double count.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use netwatch_core::{
    CheckOutcome, Collection, Device, DeviceStatus, InterfaceSample, MetricSample,
};

use crate::store::{Result, Store, StoreError};

/// Lazily created lock per address. Entries are kept for the life of the
/// tracker so every caller for an address shares one mutex.
#[derive(Default)]
struct AddressLocks {
    inner: StdMutex<HashMap<IpAddr, Arc<Mutex<()>>>>,
}

impl AddressLocks {
    fn get(&self, address: IpAddr) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(address).or_default().clone()
    }
}

pub struct DeviceTracker {
    store: Arc<dyn Store>,
    check_interval: Duration,
    locks: AddressLocks,
    metric_locks: AddressLocks,
}

impl DeviceTracker {
    /// `check_interval` is the uptime credited for every online check.
    pub fn new(store: Arc<dyn Store>, check_interval: Duration) -> Self {
        Self {
            store,
            check_interval,
            locks: AddressLocks::default(),
            metric_locks: AddressLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    // ── Devices ──────────────────────────────────────────────────

    /// Merge a candidate record into the inventory by address.
    pub async fn upsert_device(&self, candidate: &Device) -> Result<Device> {
        let lock = self.locks.get(candidate.address);
        let _guard = lock.lock().await;

        let merged = match self.store.get_device(candidate.address).await? {
            Some(mut existing) => {
                existing.merge_from(candidate);
                existing
            }
            None => candidate.clone(),
        };
        self.store.upsert_device(&merged).await?;
        Ok(merged)
    }

    /// Register a device manually. Fails if the address is already known.
    pub async fn create_device(&self, device: &Device) -> Result<Device> {
        let lock = self.locks.get(device.address);
        let _guard = lock.lock().await;

        if self.store.get_device(device.address).await?.is_some() {
            return Err(StoreError::Conflict {
                entity: "device",
                key: device.address.to_string(),
            });
        }
        let mut created = device.clone();
        created.is_active = true;
        self.store.upsert_device(&created).await?;
        tracing::info!(address = %created.address, "Device registered");
        Ok(created)
    }

    /// Mark a device inactive. Returns true if it was active before.
    pub async fn deactivate_device(&self, address: IpAddr) -> Result<bool> {
        let lock = self.locks.get(address);
        let _guard = lock.lock().await;

        match self.store.get_device(address).await? {
            Some(mut device) if device.is_active => {
                device.is_active = false;
                self.store.upsert_device(&device).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn delete_device(&self, address: IpAddr) -> Result<bool> {
        let lock = self.locks.get(address);
        let _guard = lock.lock().await;
        self.store.delete_device(address).await
    }

    // ── Status ───────────────────────────────────────────────────

    /// Apply one availability check.
    ///
    /// Online checks accrue one check interval of uptime; an offline check
    /// clears latency and resets uptime. A check id that was already applied
    /// leaves the row untouched.
    pub async fn record_check(
        &self,
        address: IpAddr,
        check_id: Uuid,
        outcome: CheckOutcome,
        now: DateTime<Utc>,
    ) -> Result<DeviceStatus> {
        let lock = self.locks.get(address);
        let _guard = lock.lock().await;

        let prior = self.store.get_device_status(address).await?;
        if let Some(prior) = &prior {
            if prior.last_check_id == Some(check_id) {
                tracing::debug!(address = %address, check_id = %check_id, "Duplicate check ignored");
                return Ok(prior.clone());
            }
        }

        let interval = self.check_interval.as_secs();
        let status = match outcome {
            CheckOutcome::Online { latency } => DeviceStatus {
                address,
                is_online: true,
                response_time_ms: Some(latency.as_secs_f64() * 1000.0),
                last_check: now,
                uptime_secs: prior.map_or(0, |p| p.uptime_secs) + interval,
                last_check_id: Some(check_id),
            },
            CheckOutcome::Offline => DeviceStatus {
                address,
                is_online: false,
                response_time_ms: None,
                last_check: now,
                uptime_secs: 0,
                last_check_id: Some(check_id),
            },
        };

        self.store.upsert_device_status(&status).await?;
        tracing::debug!(
            address = %address,
            online = status.is_online,
            uptime_secs = status.uptime_secs,
            "Check recorded"
        );
        Ok(status)
    }

    // ── Time series ──────────────────────────────────────────────

    /// Append the samples of one collection. Does not touch the status row.
    ///
    /// Returns the number of samples written. Samples already stored under
    /// this collection id are skipped, so a redelivered collection writes
    /// nothing and an interrupted one resumes where it stopped.
    pub async fn record_metrics(
        &self,
        address: IpAddr,
        collection_id: Uuid,
        collection: &Collection,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let lock = self.metric_locks.get(address);
        let _guard = lock.lock().await;

        let stored_metrics: HashSet<String> = self
            .store
            .collection_metrics(address, collection_id)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        let stored_interfaces: HashSet<String> = self
            .store
            .collection_interfaces(address, collection_id)
            .await?
            .into_iter()
            .map(|s| s.interface_name)
            .collect();

        let mut written = 0;
        for metric in &collection.metrics {
            if stored_metrics.contains(metric.kind.name()) {
                continue;
            }
            let sample = MetricSample::from_metric(address, collection_id, metric, now);
            self.store.append_metric_sample(&sample).await?;
            written += 1;
        }
        for reading in &collection.interfaces {
            if stored_interfaces.contains(&reading.name) {
                continue;
            }
            let sample = InterfaceSample::from_reading(address, collection_id, reading, now);
            self.store.append_interface_sample(&sample).await?;
            written += 1;
        }

        if written == 0 && !collection.is_empty() {
            tracing::debug!(
                address = %address,
                collection_id = %collection_id,
                "Duplicate collection ignored"
            );
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use netwatch_core::{InterfaceReading, LinkState, Metric, MetricKind};

    const INTERVAL: Duration = Duration::from_secs(60);

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn tracker() -> (DeviceTracker, MemoryStore) {
        let store = MemoryStore::new();
        (DeviceTracker::new(Arc::new(store.clone()), INTERVAL), store)
    }

    fn online(ms: u64) -> CheckOutcome {
        CheckOutcome::Online {
            latency: Duration::from_millis(ms),
        }
    }

    #[tokio::test]
    async fn test_first_check_creates_status() {
        let (tracker, _) = tracker();
        let up = tracker
            .record_check(addr("10.0.0.1"), Uuid::new_v4(), online(4), Utc::now())
            .await
            .unwrap();
        assert!(up.is_online);
        assert_eq!(up.uptime_secs, 60);
        assert_eq!(up.response_time_ms, Some(4.0));

        let down = tracker
            .record_check(addr("10.0.0.2"), Uuid::new_v4(), CheckOutcome::Offline, Utc::now())
            .await
            .unwrap();
        assert!(!down.is_online);
        assert_eq!(down.uptime_secs, 0);
    }

    #[tokio::test]
    async fn test_uptime_accumulates_and_resets() {
        let (tracker, _) = tracker();
        let a = addr("10.0.0.1");
        for _ in 0..5 {
            tracker.record_check(a, Uuid::new_v4(), online(1), Utc::now()).await.unwrap();
        }
        let status = tracker.store().get_device_status(a).await.unwrap().unwrap();
        assert_eq!(status.uptime_secs, 5 * 60);

        let down = tracker
            .record_check(a, Uuid::new_v4(), CheckOutcome::Offline, Utc::now())
            .await
            .unwrap();
        assert_eq!(down.uptime_secs, 0);
        assert_eq!(down.response_time_ms, None);

        let up = tracker.record_check(a, Uuid::new_v4(), online(1), Utc::now()).await.unwrap();
        assert_eq!(up.uptime_secs, 60);
    }

    #[tokio::test]
    async fn test_redelivered_check_is_not_double_counted() {
        let (tracker, _) = tracker();
        let a = addr("10.0.0.1");
        let check_id = Uuid::new_v4();
        tracker.record_check(a, check_id, online(2), Utc::now()).await.unwrap();
        let again = tracker.record_check(a, check_id, online(2), Utc::now()).await.unwrap();
        assert_eq!(again.uptime_secs, 60);
    }

    #[tokio::test]
    async fn test_concurrent_checks_same_address_no_lost_update() {
        let (tracker, _) = tracker();
        let tracker = Arc::new(tracker);
        let a = addr("10.0.0.9");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.record_check(a, Uuid::new_v4(), online(1), Utc::now()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let status = tracker.store().get_device_status(a).await.unwrap().unwrap();
        assert_eq!(status.uptime_secs, 32 * 60);
    }

    #[tokio::test]
    async fn test_persistence_error_propagates() {
        let (tracker, store) = tracker();
        store.set_available(false);
        let err = tracker
            .record_check(addr("10.0.0.1"), Uuid::new_v4(), online(1), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_upsert_without_details_preserves_fields() {
        let (tracker, _) = tracker();
        let now = Utc::now();
        let mut named = Device::new(addr("10.0.0.1"), now);
        named.hostname = Some("nas".to_string());
        named.vendor = Some("Intel".to_string());
        tracker.upsert_device(&named).await.unwrap();

        let merged = tracker.upsert_device(&Device::new(addr("10.0.0.1"), now)).await.unwrap();
        assert_eq!(merged.hostname.as_deref(), Some("nas"));
        assert_eq!(merged.vendor.as_deref(), Some("Intel"));
    }

    #[tokio::test]
    async fn test_create_device_conflict() {
        let (tracker, _) = tracker();
        let device = Device::new(addr("10.0.0.1"), Utc::now());
        tracker.create_device(&device).await.unwrap();
        let err = tracker.create_device(&device).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_status() {
        let (tracker, store) = tracker();
        let a = addr("10.0.0.1");
        tracker.create_device(&Device::new(a, Utc::now())).await.unwrap();
        tracker.record_check(a, Uuid::new_v4(), online(1), Utc::now()).await.unwrap();

        assert!(tracker.delete_device(a).await.unwrap());
        assert!(store.get_device(a).await.unwrap().is_none());
        assert!(store.get_device_status(a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_metrics_is_idempotent_per_collection() {
        let (tracker, store) = tracker();
        let a = addr("10.0.0.1");
        let collection = Collection {
            metrics: vec![Metric::new(MetricKind::CpuUsage, 12.0).unwrap()],
            interfaces: vec![InterfaceReading {
                index: 1,
                name: "eth0".to_string(),
                admin_status: Some(LinkState::Up),
                oper_status: Some(LinkState::Up),
                bandwidth_usage: None,
                error_count: 0,
            }],
            ..Default::default()
        };
        let id = Uuid::new_v4();

        assert_eq!(tracker.record_metrics(a, id, &collection, Utc::now()).await.unwrap(), 2);
        assert_eq!(tracker.record_metrics(a, id, &collection, Utc::now()).await.unwrap(), 0);
        assert_eq!(store.query_metrics(a, 10).await.unwrap().len(), 1);
        assert_eq!(store.query_interface_status(a, 10).await.unwrap().len(), 1);

        // Status rows are untouched by metric writes.
        assert!(store.get_device_status(a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_smaller_retry_does_not_duplicate_samples() {
        let (tracker, store) = tracker();
        let a = addr("10.0.0.1");
        let id = Uuid::new_v4();
        let first = Collection {
            metrics: vec![
                Metric::new(MetricKind::CpuUsage, 12.0).unwrap(),
                Metric::new(MetricKind::MemoryUsage, 40.0).unwrap(),
            ],
            ..Default::default()
        };
        // Same collection id, but the memory OIDs timed out this time.
        let retry = Collection {
            metrics: vec![Metric::new(MetricKind::CpuUsage, 13.0).unwrap()],
            ..Default::default()
        };

        assert_eq!(tracker.record_metrics(a, id, &first, Utc::now()).await.unwrap(), 2);
        assert_eq!(tracker.record_metrics(a, id, &retry, Utc::now()).await.unwrap(), 0);
        let cpu_rows = store
            .query_metrics(a, 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.name == "cpu_usage")
            .count();
        assert_eq!(cpu_rows, 1);
    }

    #[tokio::test]
    async fn test_metric_writes_do_not_wait_on_status_lock() {
        let (tracker, _) = tracker();
        let a = addr("10.0.0.1");
        let status_lock = tracker.locks.get(a);
        let _held = status_lock.lock().await;

        let collection = Collection {
            metrics: vec![Metric::new(MetricKind::CpuUsage, 5.0).unwrap()],
            ..Default::default()
        };
        let written = tokio::time::timeout(
            Duration::from_secs(1),
            tracker.record_metrics(a, Uuid::new_v4(), &collection, Utc::now()),
        )
        .await
        .expect("metric write blocked behind the status lock")
        .unwrap();
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_address_serialized() {
        let (tracker, _) = tracker();
        let a = addr("10.0.0.1");
        tracker.create_device(&Device::new(a, Utc::now())).await.unwrap();

        let before = tracker.locks.get(a);
        tracker.delete_device(a).await.unwrap();
        let after = tracker.locks.get(a);
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_interrupted_collection_resumes() {
        let (tracker, store) = tracker();
        let a = addr("10.0.0.1");
        let id = Uuid::new_v4();
        let partial = Collection {
            metrics: vec![Metric::new(MetricKind::CpuUsage, 12.0).unwrap()],
            ..Default::default()
        };
        let full = Collection {
            metrics: vec![
                Metric::new(MetricKind::CpuUsage, 12.0).unwrap(),
                Metric::new(MetricKind::MemoryUsage, 40.0).unwrap(),
            ],
            ..Default::default()
        };

        assert_eq!(tracker.record_metrics(a, id, &partial, Utc::now()).await.unwrap(), 1);
        assert_eq!(tracker.record_metrics(a, id, &full, Utc::now()).await.unwrap(), 1);
        let names: Vec<String> = store
            .query_metrics(a, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"memory_usage".to_string()));
    }
}
