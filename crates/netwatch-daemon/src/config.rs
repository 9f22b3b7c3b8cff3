//! Process configuration.

use serde::Deserialize;

use netwatch_core::config::load_section;
use netwatch_core::error::Result;
use netwatch_discover::config::DiscoverConfig;
use netwatch_monitor::config::MonitorConfig;

/// Loaded from the `[worker]` section or `NETWATCH__WORKER__` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Bound of the job channel; triggers beyond it are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Attempts per job, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetwatchConfig {
    pub discover: DiscoverConfig,
    pub monitor: MonitorConfig,
    pub worker: WorkerConfig,
}

impl NetwatchConfig {
    /// Load every section from `<file_prefix>.toml` (optional) and the
    /// environment.
    pub fn load(file_prefix: &str) -> Result<Self> {
        Ok(Self {
            discover: load_section(file_prefix, "discover")?,
            monitor: load_section(file_prefix, "monitor")?,
            worker: load_section(file_prefix, "worker")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[discover]
probe_timeout_ms = 750

[[discover.subnets]]
cidr = "192.168.10.0/24"
name = "lab"

[monitor]
availability_interval_secs = 30

[monitor.snmp]
community = "ops"
"#
        )
        .unwrap();
        let prefix = file.path().with_extension("");

        let config = NetwatchConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.discover.probe_timeout_ms, 750);
        assert_eq!(config.discover.subnets.len(), 1);
        assert_eq!(config.discover.subnets[0].interval_secs, 300);
        assert_eq!(config.monitor.availability_interval_secs, 30);
        assert_eq!(config.monitor.snmp.community, "ops");
        assert_eq!(config.monitor.snmp.port, 161);
        assert_eq!(config.worker.max_attempts, 3);
    }
}
