//! netwatch-store — persistence interface and device state tracking.
//!
//! This crate is the single mutation point for device and status records.
//! Discovery and monitoring results flow through [`DeviceTracker`], which
//! serializes writes per address and keeps every write idempotent under
//! redelivery.

pub mod memory;
pub mod store;
pub mod tracker;

pub use memory::MemoryStore;
pub use store::{Store, StoreError};
pub use tracker::DeviceTracker;
