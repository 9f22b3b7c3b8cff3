//! Configuration for network discovery.

use std::time::Duration;

use serde::Deserialize;

/// Top-level discover configuration.
///
/// Loaded from the `[discover]` section of `netwatch.toml` or
/// `NETWATCH__DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Subnets swept on a fixed cadence.
    #[serde(default)]
    pub subnets: Vec<SubnetSchedule>,

    /// Per-probe ICMP timeout in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long ARP replies are collected after the broadcast, in milliseconds.
    #[serde(default = "default_link_window_ms")]
    pub link_window_ms: u64,

    /// Optional extra OUI prefixes, one `<prefix>[/<bits>] <vendor>` per line.
    #[serde(default)]
    pub vendor_file: Option<String>,
}

/// A subnet with its scan schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct SubnetSchedule {
    /// CIDR target (e.g., "192.168.1.0/24").
    pub cidr: String,

    /// Human-readable name for this subnet.
    pub name: Option<String>,

    /// Scan interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Whether this subnet is enabled for scanning.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl DiscoverConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn link_window(&self) -> Duration {
        Duration::from_millis(self.link_window_ms)
    }
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

fn default_link_window_ms() -> u64 {
    1_000
}

fn default_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            subnets: Vec::new(),
            probe_timeout_ms: default_probe_timeout_ms(),
            link_window_ms: default_link_window_ms(),
            vendor_file: None,
        }
    }
}
