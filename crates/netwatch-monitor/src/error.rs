//! Error types for the netwatch-monitor crate.

use std::net::IpAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("SNMP request to {target} for {oid} timed out")]
    Timeout { target: IpAddr, oid: String },

    #[error("SNMP agent returned error-status {status} at index {index}")]
    ErrorStatus { status: i64, index: i64 },

    #[error("Malformed SNMP message: {0}")]
    Decode(String),

    #[error("Invalid object identifier: {0}")]
    InvalidOid(String),

    #[error("Liveness precheck failed: {0}")]
    Precheck(#[from] netwatch_discover::DiscoverError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
