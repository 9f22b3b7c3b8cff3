//! netwatch-monitor: Protocol metric collection for the netwatch engine.
//!
//! Speaks SNMPv2c GET over UDP, reads the system group, vendor CPU/memory
//! counters, and the IF-MIB interface table, and turns raw readings into
//! validated metrics and interface samples.

pub mod collector;
pub mod config;
pub mod error;
pub mod snmp;

pub use collector::MetricCollector;
pub use error::MonitorError;
pub use snmp::{Oid, SnmpTransport, SnmpValue, UdpSnmpClient};
