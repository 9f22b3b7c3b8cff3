//! netwatch-core: Shared types, configuration, and error handling for the netwatch engine.
//!
//! This crate provides the foundational types used across all netwatch components:
//! - Device inventory records and scan runs produced by discovery
//! - Per-device status, metric samples, and interface samples produced by monitoring
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use error::NetwatchError;
pub use types::{
    CheckOutcome, Collection, Device, DeviceStatus, InterfaceReading, InterfaceSample, LinkState,
    MacAddress, Metric, MetricCategory, MetricKind, MetricSample, MetricUnit, ScanRun, ScanStatus,
    SystemInfo,
};
