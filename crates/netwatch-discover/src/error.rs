//! Error types for the netwatch-discover crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Probe transport unavailable: {0}")]
    ProbeUnavailable(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("No local interface attached to {subnet}")]
    NoInterface { subnet: String },

    #[error("Link-layer transport error: {0}")]
    Link(String),

    #[error("Subnet {subnet} is too large to sweep (at most {max_hosts} hosts)")]
    SubnetTooLarge { subnet: String, max_hosts: u64 },

    #[error("Invalid vendor table entry on line {line}: {reason}")]
    VendorTable { line: usize, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] netwatch_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
