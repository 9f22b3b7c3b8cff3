//! netwatch-discover: Network discovery for the netwatch engine.
//!
//! Sweeps a subnet with ICMP echo probes, correlates responders with their
//! link-layer hardware addresses over ARP, resolves vendors from the OUI
//! prefix table, and merges the result into the device inventory.

pub mod config;
pub mod error;
pub mod link;
pub mod prober;
pub mod scanner;
pub mod vendor;

pub use error::DiscoverError;
pub use link::{ArpTransport, LinkEntry, LinkLayer, LinkLayerCorrelator};
pub use prober::{IcmpPinger, LivenessProber, Pinger, ProbeOutcome};
pub use scanner::DiscoveryOrchestrator;
pub use vendor::VendorTable;
