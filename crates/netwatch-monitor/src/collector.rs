//! Protocol metric collection.
//!
//! A collection pass first checks liveness; an unreachable device yields an
//! empty [`Collection`]. Otherwise the system group, the vendor CPU and
//! memory counters, and up to `max_interfaces` IF-MIB rows are read. Each
//! OID is independent: a failed or missing one only drops the values that
//! depend on it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use netwatch_core::{Collection, InterfaceReading, LinkState, Metric, MetricKind, SystemInfo};
use netwatch_discover::LivenessProber;

use crate::error::Result;
use crate::snmp::{Oid, SnmpTransport, SnmpValue};

/// Object identifiers read by the collector.
pub mod oids {
    pub const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
    pub const SYS_UPTIME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];
    pub const SYS_NAME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];

    /// Cisco avgBusy5.
    pub const CPU_USAGE: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 2, 1, 56, 0];
    /// Cisco ciscoMemoryPoolUsed / ciscoMemoryPoolFree, processor pool.
    pub const MEMORY_USED: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 48, 1, 1, 1, 5, 1];
    pub const MEMORY_FREE: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 48, 1, 1, 1, 6, 1];

    pub const IF_NUMBER: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 1, 0];
    /// ifEntry; append column then row index.
    pub const IF_ENTRY: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1];

    pub const IF_DESCR: u32 = 2;
    pub const IF_SPEED: u32 = 5;
    pub const IF_ADMIN_STATUS: u32 = 7;
    pub const IF_OPER_STATUS: u32 = 8;
    pub const IF_IN_OCTETS: u32 = 10;
    pub const IF_IN_ERRORS: u32 = 14;
    pub const IF_OUT_OCTETS: u32 = 16;
    pub const IF_OUT_ERRORS: u32 = 20;
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Octet counters of one interface at one instant.
#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub in_octets: u32,
    pub out_octets: u32,
    pub at: Instant,
}

pub struct MetricCollector {
    snmp: Arc<dyn SnmpTransport>,
    prober: LivenessProber,
    max_interfaces: u32,
    counters: Mutex<HashMap<(IpAddr, u32), CounterSnapshot>>,
}

impl MetricCollector {
    pub fn new(snmp: Arc<dyn SnmpTransport>, prober: LivenessProber, max_interfaces: u32) -> Self {
        Self {
            snmp,
            prober,
            max_interfaces: max_interfaces.max(1),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Collect everything readable from `address`.
    ///
    /// Errors only when the liveness transport itself is unusable.
    pub async fn collect(&self, address: IpAddr) -> Result<Collection> {
        let outcome = self.prober.probe(address).await?;
        if !outcome.is_reachable() {
            tracing::debug!(address = %address, "Skipping collection, device unreachable");
            return Ok(Collection::default());
        }

        let (system, metrics) = tokio::join!(self.system_info(address), self.system_metrics(address));
        let interfaces = self.interfaces(address).await;

        tracing::debug!(
            address = %address,
            metrics = metrics.len(),
            interfaces = interfaces.len(),
            "Collection finished"
        );

        Ok(Collection {
            system,
            metrics,
            interfaces,
        })
    }

    async fn value(&self, address: IpAddr, oid: Oid) -> Option<SnmpValue> {
        match self.snmp.get(address, &oid).await {
            Ok(value) if value.is_present() => Some(value),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(address = %address, oid = %oid, error = %e, "SNMP query failed");
                None
            }
        }
    }

    async fn system_info(&self, address: IpAddr) -> SystemInfo {
        let (name, description, uptime) = tokio::join!(
            self.value(address, oids::SYS_NAME.into()),
            self.value(address, oids::SYS_DESCR.into()),
            self.value(address, oids::SYS_UPTIME.into()),
        );
        SystemInfo {
            name: name.and_then(|v| v.as_text()),
            description: description.and_then(|v| v.as_text()),
            uptime_ticks: uptime.and_then(|v| v.as_u64()),
        }
    }

    async fn system_metrics(&self, address: IpAddr) -> Vec<Metric> {
        let (cpu, used, free) = tokio::join!(
            self.value(address, oids::CPU_USAGE.into()),
            self.value(address, oids::MEMORY_USED.into()),
            self.value(address, oids::MEMORY_FREE.into()),
        );
        derive_system_metrics(
            cpu.and_then(|v| v.as_f64()),
            used.and_then(|v| v.as_f64()),
            free.and_then(|v| v.as_f64()),
        )
    }

    async fn interfaces(&self, address: IpAddr) -> Vec<InterfaceReading> {
        let count = match self.value(address, oids::IF_NUMBER.into()).await {
            Some(v) => v
                .as_u64()
                .map(|n| n.min(u64::from(self.max_interfaces)) as u32)
                .unwrap_or(1),
            None => 1,
        };

        let mut rows = Vec::with_capacity(count as usize);
        for index in 1..=count {
            if let Some(row) = self.interface_row(address, index).await {
                rows.push(row);
            }
        }
        rows
    }

    async fn interface_row(&self, address: IpAddr, index: u32) -> Option<InterfaceReading> {
        let entry = Oid::from(oids::IF_ENTRY);
        let column = |c: u32| entry.child(c).child(index);
        let (descr, speed, admin, oper, in_octets, in_errors, out_octets, out_errors) = tokio::join!(
            self.value(address, column(oids::IF_DESCR)),
            self.value(address, column(oids::IF_SPEED)),
            self.value(address, column(oids::IF_ADMIN_STATUS)),
            self.value(address, column(oids::IF_OPER_STATUS)),
            self.value(address, column(oids::IF_IN_OCTETS)),
            self.value(address, column(oids::IF_IN_ERRORS)),
            self.value(address, column(oids::IF_OUT_OCTETS)),
            self.value(address, column(oids::IF_OUT_ERRORS)),
        );

        let admin_status = admin.and_then(|v| v.as_i64()).map(LinkState::from_code);
        let oper_status = oper.and_then(|v| v.as_i64()).map(LinkState::from_code);
        if admin_status.is_none() && oper_status.is_none() {
            return None;
        }

        let octets = |v: Option<SnmpValue>| v.and_then(|v| v.as_u64()).map(|n| n as u32);
        let bandwidth_usage = match (octets(in_octets), octets(out_octets)) {
            (Some(in_octets), Some(out_octets)) => {
                let current = CounterSnapshot {
                    in_octets,
                    out_octets,
                    at: Instant::now(),
                };
                let previous = self.remember(address, index, current);
                let speed = speed.and_then(|v| v.as_u64()).unwrap_or(0);
                previous.and_then(|p| utilization(&p, &current, speed))
            }
            _ => None,
        };

        let error_count = [in_errors, out_errors]
            .into_iter()
            .filter_map(|v| v.and_then(|v| v.as_u64()))
            .sum();

        Some(InterfaceReading {
            index,
            name: descr
                .and_then(|v| v.as_text())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("if{index}")),
            admin_status,
            oper_status,
            bandwidth_usage,
            error_count,
        })
    }

    /// Store `current` and return the snapshot it replaces.
    fn remember(
        &self,
        address: IpAddr,
        index: u32,
        current: CounterSnapshot,
    ) -> Option<CounterSnapshot> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.insert((address, index), current)
    }

    /// Drop the counter history of a device that left the inventory.
    pub fn forget(&self, address: IpAddr) {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.retain(|(addr, _), _| *addr != address);
    }
}

/// System metrics from raw readings. Memory metrics need both counters and
/// a nonzero total.
pub fn derive_system_metrics(
    cpu: Option<f64>,
    used: Option<f64>,
    free: Option<f64>,
) -> Vec<Metric> {
    let mut metrics = Vec::new();
    if let Some(cpu) = cpu {
        metrics.extend(Metric::new(MetricKind::CpuUsage, cpu));
    }
    if let (Some(used), Some(free)) = (used, free) {
        let total = used + free;
        if total > 0.0 {
            metrics.extend(Metric::new(MetricKind::MemoryUsage, used / total * 100.0));
            metrics.extend(Metric::new(MetricKind::MemoryUsedMb, used / BYTES_PER_MB));
            metrics.extend(Metric::new(MetricKind::MemoryTotalMb, total / BYTES_PER_MB));
        }
    }
    metrics
}

/// Percent of `speed_bps` used between two snapshots, taking the busier
/// direction. Counters are 32-bit and may wrap once between polls.
pub fn utilization(
    previous: &CounterSnapshot,
    current: &CounterSnapshot,
    speed_bps: u64,
) -> Option<f64> {
    let elapsed = current.at.checked_duration_since(previous.at)?;
    if speed_bps == 0 || elapsed < Duration::from_millis(1) {
        return None;
    }
    let in_delta = current.in_octets.wrapping_sub(previous.in_octets);
    let out_delta = current.out_octets.wrapping_sub(previous.out_octets);
    let bits = f64::from(in_delta.max(out_delta)) * 8.0;
    let percent = bits / elapsed.as_secs_f64() / speed_bps as f64 * 100.0;
    Some(percent.min(100.0))
}
