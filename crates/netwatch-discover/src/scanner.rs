//! Discovery orchestration.
//!
//! One scan: sweep + link-layer correlation (concurrently) → candidate
//! devices for every reachable address → merge into the inventory →
//! deactivate inventory devices of the subnet that did not answer.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use uuid::Uuid;

use netwatch_core::types::{placeholder_hostname, UNKNOWN, UNKNOWN_CLASS};
use netwatch_core::{Device, ScanRun};
use netwatch_store::{DeviceTracker, Store};

use crate::error::{DiscoverError, Result};
use crate::link::{LinkEntry, LinkLayerCorrelator};
use crate::prober::{LivenessProber, ProbeOutcome};

/// Largest sweep accepted (a /16 worth of hosts).
pub const MAX_SWEEP_HOSTS: u64 = 1 << 16;

/// Reject subnets too large to sweep host by host.
pub fn validate_subnet(subnet: &IpNet) -> Result<()> {
    let host_bits = u32::from(subnet.max_prefix_len() - subnet.prefix_len());
    if host_bits > MAX_SWEEP_HOSTS.trailing_zeros() {
        return Err(DiscoverError::SubnetTooLarge {
            subnet: subnet.to_string(),
            max_hosts: MAX_SWEEP_HOSTS,
        });
    }
    Ok(())
}

pub struct DiscoveryOrchestrator {
    prober: LivenessProber,
    correlator: LinkLayerCorrelator,
    tracker: Arc<DeviceTracker>,
}

impl DiscoveryOrchestrator {
    pub fn new(
        prober: LivenessProber,
        correlator: LinkLayerCorrelator,
        tracker: Arc<DeviceTracker>,
    ) -> Self {
        Self {
            prober,
            correlator,
            tracker,
        }
    }

    /// Execute one scan of `subnet` recorded under `scan_id`.
    ///
    /// A scan whose probe transport cannot start is recorded as failed and
    /// returned as `Ok`; only persistence failures and invalid subnets are
    /// returned as errors.
    pub async fn run_scan(&self, scan_id: Uuid, subnet: IpNet) -> Result<ScanRun> {
        validate_subnet(&subnet)?;
        let store = self.tracker.store();

        let mut run = ScanRun::start(scan_id, subnet, Utc::now());
        store.create_scan_run(&run).await?;
        tracing::info!(scan_id = %scan_id, subnet = %subnet, "Starting scan");

        let hosts: Vec<IpAddr> = subnet.hosts().collect();
        let (sweep, link) = tokio::join!(
            self.prober.sweep(&hosts),
            self.correlator.correlate(subnet)
        );

        let outcomes = match sweep {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::error!(scan_id = %scan_id, subnet = %subnet, error = %e, "Scan failed");
                run.fail(Utc::now());
                store.update_scan_run(&run).await?;
                return Ok(run);
            }
        };

        let now = Utc::now();
        let candidates = build_candidates(&outcomes, &link, now);
        let mut seen = HashSet::with_capacity(candidates.len());
        for candidate in &candidates {
            self.tracker.upsert_device(candidate).await?;
            seen.insert(candidate.address);
        }

        let mut deactivated = 0u32;
        for device in store.list_active_devices().await? {
            if subnet.contains(&device.address)
                && !seen.contains(&device.address)
                && self.tracker.deactivate_device(device.address).await?
            {
                deactivated += 1;
            }
        }

        run.complete(candidates.len() as u32, Utc::now());
        store.update_scan_run(&run).await?;

        tracing::info!(
            scan_id = %scan_id,
            subnet = %subnet,
            probed = hosts.len(),
            devices_found = run.devices_found,
            link_resolved = link.len(),
            deactivated,
            duration_ms = run.duration_ms.unwrap_or_default(),
            "Scan complete"
        );

        Ok(run)
    }
}

/// One candidate record per reachable address, enriched with link-layer
/// data on an exact address match. Sorted by address.
pub fn build_candidates(
    outcomes: &HashMap<IpAddr, ProbeOutcome>,
    link: &HashMap<IpAddr, LinkEntry>,
    now: DateTime<Utc>,
) -> Vec<Device> {
    let mut devices: Vec<Device> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_reachable())
        .map(|(&address, _)| {
            let entry = link.get(&address);
            Device {
                address,
                mac_address: entry.map(|e| e.mac),
                hostname: Some(placeholder_hostname(address)),
                vendor: Some(entry.map_or_else(|| UNKNOWN.to_string(), |e| e.vendor.clone())),
                device_class: Some(UNKNOWN_CLASS.to_string()),
                is_active: true,
                last_seen: now,
                created_at: now,
            }
        })
        .collect();
    devices.sort_by_key(|d| d.address);
    devices
}
