//! Configuration for availability checks and metric collection.

use std::time::Duration;

use serde::Deserialize;

/// Loaded from the `[monitor]` section of `netwatch.toml` or
/// `NETWATCH__MONITOR__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Cadence of availability checks, and the uptime credited per online check.
    #[serde(default = "default_availability_interval")]
    pub availability_interval_secs: u64,

    /// Cadence of metric collection.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// ICMP timeout for availability checks and the collection precheck.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default)]
    pub snmp: SnmpConfig,

    /// Upper bound on interface rows polled per device.
    #[serde(default = "default_max_interfaces")]
    pub max_interfaces: u32,

    /// Default row limit for metric queries.
    #[serde(default = "default_metrics_limit")]
    pub metrics_limit: usize,

    /// Default row limit for interface queries.
    #[serde(default = "default_interfaces_limit")]
    pub interfaces_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnmpConfig {
    #[serde(default = "default_community")]
    pub community: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_snmp_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl MonitorConfig {
    pub fn availability_interval(&self) -> Duration {
        Duration::from_secs(self.availability_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl SnmpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_availability_interval() -> u64 {
    60
}

fn default_metrics_interval() -> u64 {
    300
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

fn default_max_interfaces() -> u32 {
    16
}

fn default_metrics_limit() -> usize {
    100
}

fn default_interfaces_limit() -> usize {
    10
}

fn default_community() -> String {
    "public".to_string()
}

fn default_port() -> u16 {
    161
}

fn default_snmp_timeout_ms() -> u64 {
    2_000
}

fn default_retries() -> u32 {
    1
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            community: default_community(),
            port: default_port(),
            timeout_ms: default_snmp_timeout_ms(),
            retries: default_retries(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            availability_interval_secs: default_availability_interval(),
            metrics_interval_secs: default_metrics_interval(),
            probe_timeout_ms: default_probe_timeout_ms(),
            snmp: SnmpConfig::default(),
            max_interfaces: default_max_interfaces(),
            metrics_limit: default_metrics_limit(),
            interfaces_limit: default_interfaces_limit(),
        }
    }
}
