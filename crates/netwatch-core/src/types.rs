//! Core domain types for the netwatch engine.
//!
//! These types are the records exchanged between discovery, monitoring,
//! the device state tracker, and the persistence layer.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{NetwatchError, Result};

/// Placeholder used for vendor and hardware fields that could not be resolved.
pub const UNKNOWN: &str = "Unknown";

/// Device class assigned to scanned devices until something more specific is known.
pub const UNKNOWN_CLASS: &str = "unknown";

// ── Hardware address ──────────────────────────────────────────────

/// A 48-bit link-layer hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = NetwatchError;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `AA-BB-CC-DD-EE-FF`.
    fn from_str(s: &str) -> Result<Self> {
        let groups: Vec<&str> = s.trim().split([':', '-']).collect();
        if groups.len() != 6 {
            return Err(NetwatchError::InvalidMac(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (slot, group) in octets.iter_mut().zip(groups) {
            if group.len() != 2 {
                return Err(NetwatchError::InvalidMac(s.to_string()));
            }
            *slot = u8::from_str_radix(group, 16)
                .map_err(|_| NetwatchError::InvalidMac(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Addresses ─────────────────────────────────────────────────────

/// Parse a subnet in CIDR notation. A bare address is treated as a
/// single-host network. Host bits are cleared.
pub fn parse_subnet(value: &str) -> Result<IpNet> {
    let value = value.trim();
    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    value
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|e| NetwatchError::InvalidSubnet {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a single device address.
pub fn parse_address(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse()
        .map_err(|_| NetwatchError::InvalidAddress(value.to_string()))
}

/// Deterministic hostname for a device whose name could not be resolved.
pub fn placeholder_hostname(address: IpAddr) -> String {
    format!("device-{}", address.to_string().replace(['.', ':'], "-"))
}

// ── Device ────────────────────────────────────────────────────────

/// A device in the inventory. The address is the identity key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub address: IpAddr,
    pub mac_address: Option<MacAddress>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub device_class: Option<String>,
    pub is_active: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// A bare, active device carrying only its address.
    pub fn new(address: IpAddr, now: DateTime<Utc>) -> Self {
        Self {
            address,
            mac_address: None,
            hostname: None,
            vendor: None,
            device_class: None,
            is_active: true,
            last_seen: now,
            created_at: now,
        }
    }

    /// Merge a freshly observed record for the same address into this one.
    ///
    /// Existing fields are kept unless the incoming record carries a more
    /// specific value. Placeholders ("Unknown", the generated hostname,
    /// "unknown" class) only fill fields that are still empty.
    pub fn merge_from(&mut self, incoming: &Device) {
        let placeholder = placeholder_hostname(self.address);

        if incoming.mac_address.is_some() {
            self.mac_address = incoming.mac_address;
        }
        merge_field(&mut self.hostname, &incoming.hostname, |v| v == placeholder);
        merge_field(&mut self.vendor, &incoming.vendor, |v| {
            v.eq_ignore_ascii_case(UNKNOWN)
        });
        merge_field(&mut self.device_class, &incoming.device_class, |v| {
            v.eq_ignore_ascii_case(UNKNOWN_CLASS)
        });

        self.is_active = incoming.is_active;
        self.last_seen = self.last_seen.max(incoming.last_seen);
    }
}

fn merge_field(existing: &mut Option<String>, incoming: &Option<String>, is_default: impl Fn(&str) -> bool) {
    let Some(value) = incoming.as_deref().map(str::trim) else {
        return;
    };
    if value.is_empty() {
        return;
    }
    if !is_default(value) || existing.is_none() {
        *existing = Some(value.to_string());
    }
}

// ── Scan runs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

/// One discovery pass over a subnet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRun {
    pub id: Uuid,
    pub subnet: IpNet,
    pub devices_found: u32,
    pub duration_ms: Option<u64>,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanRun {
    pub fn start(id: Uuid, subnet: IpNet, now: DateTime<Utc>) -> Self {
        Self {
            id,
            subnet,
            devices_found: 0,
            duration_ms: None,
            status: ScanStatus::Running,
            started_at: now,
            finished_at: None,
        }
    }

    /// Transition running → completed. Returns false if the run already terminated.
    pub fn complete(&mut self, devices_found: u32, now: DateTime<Utc>) -> bool {
        if !self.finish(ScanStatus::Completed, now) {
            return false;
        }
        self.devices_found = devices_found;
        true
    }

    /// Transition running → failed with zero devices. Returns false if the
    /// run already terminated.
    pub fn fail(&mut self, now: DateTime<Utc>) -> bool {
        if !self.finish(ScanStatus::Failed, now) {
            return false;
        }
        self.devices_found = 0;
        true
    }

    fn finish(&mut self, status: ScanStatus, now: DateTime<Utc>) -> bool {
        if self.status != ScanStatus::Running {
            return false;
        }
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        true
    }
}

// ── Device status ─────────────────────────────────────────────────

/// Result of one availability check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckOutcome {
    Online { latency: Duration },
    Offline,
}

/// Authoritative reachability state of one address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStatus {
    pub address: IpAddr,
    pub is_online: bool,
    /// Round-trip time of the last successful check, in milliseconds.
    pub response_time_ms: Option<f64>,
    pub last_check: DateTime<Utc>,
    /// Interval-counted uptime in seconds.
    pub uptime_secs: u64,
    /// Id of the last check applied to this row; repeats are ignored.
    pub last_check_id: Option<Uuid>,
}

// ── Metrics ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    System,
    Interface,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricUnit {
    Percent,
    Megabytes,
}

impl MetricUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Percent => "%",
            Self::Megabytes => "MB",
        }
    }
}

/// Known metric kinds, with an escape hatch for names outside the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricKind {
    CpuUsage,
    MemoryUsage,
    MemoryUsedMb,
    MemoryTotalMb,
    Other(String),
}

impl MetricKind {
    pub fn name(&self) -> &str {
        match self {
            Self::CpuUsage => "cpu_usage",
            Self::MemoryUsage => "memory_usage",
            Self::MemoryUsedMb => "memory_used_mb",
            Self::MemoryTotalMb => "memory_total_mb",
            Self::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "cpu_usage" => Self::CpuUsage,
            "memory_usage" => Self::MemoryUsage,
            "memory_used_mb" => Self::MemoryUsedMb,
            "memory_total_mb" => Self::MemoryTotalMb,
            other => Self::Other(other.to_string()),
        }
    }

    /// Percent for `*usage` names, megabytes for everything else.
    pub fn unit(&self) -> MetricUnit {
        if self.name().ends_with("usage") {
            MetricUnit::Percent
        } else {
            MetricUnit::Megabytes
        }
    }
}

/// A validated metric value produced by one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub kind: MetricKind,
    pub value: f64,
}

impl Metric {
    /// Rejects NaN and infinite values.
    pub fn new(kind: MetricKind, value: f64) -> Option<Self> {
        value.is_finite().then_some(Self { kind, value })
    }

    pub fn unit(&self) -> MetricUnit {
        self.kind.unit()
    }
}

/// One stored point of a device's metric time series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub address: IpAddr,
    pub collection_id: Uuid,
    pub category: MetricCategory,
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn from_metric(
        address: IpAddr,
        collection_id: Uuid,
        metric: &Metric,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            collection_id,
            category: MetricCategory::System,
            name: metric.kind.name().to_string(),
            value: metric.value,
            unit: metric.unit(),
            timestamp,
        }
    }
}

// ── Interfaces ────────────────────────────────────────────────────

/// IF-MIB administrative / operational state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Up,
    Down,
    Testing,
    Unknown,
}

impl LinkState {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Up,
            2 => Self::Down,
            3 => Self::Testing,
            _ => Self::Unknown,
        }
    }
}

/// One interface row as read by the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceReading {
    pub index: u32,
    pub name: String,
    pub admin_status: Option<LinkState>,
    pub oper_status: Option<LinkState>,
    /// Percent of link speed used since the previous poll.
    pub bandwidth_usage: Option<f64>,
    pub error_count: u64,
}

/// One stored interface poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceSample {
    pub address: IpAddr,
    pub collection_id: Uuid,
    pub interface_name: String,
    pub admin_status: Option<LinkState>,
    pub oper_status: Option<LinkState>,
    pub bandwidth_usage: Option<f64>,
    pub error_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl InterfaceSample {
    pub fn from_reading(
        address: IpAddr,
        collection_id: Uuid,
        reading: &InterfaceReading,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            collection_id,
            interface_name: reading.name.clone(),
            admin_status: reading.admin_status,
            oper_status: reading.oper_status,
            bandwidth_usage: reading.bandwidth_usage,
            error_count: reading.error_count,
            timestamp,
        }
    }
}

// ── Collections ───────────────────────────────────────────────────

/// Descriptive system group values; informational only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub uptime_ticks: Option<u64>,
}

/// Everything one collection cycle produced for a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    pub system: SystemInfo,
    pub metrics: Vec<Metric>,
    pub interfaces: Vec<InterfaceReading>,
}

impl Collection {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.interfaces.is_empty()
    }

    pub fn metric(&self, kind: &MetricKind) -> Option<f64> {
        self.metrics.iter().find(|m| &m.kind == kind).map(|m| m.value)
    }
}
