use thiserror::Error;

/// Top-level error type for shared parsing and configuration failures.
#[derive(Error, Debug)]
pub enum NetwatchError {
    #[error("Invalid subnet {value}: {reason}")]
    InvalidSubnet { value: String, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid hardware address: {0}")]
    InvalidMac(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, NetwatchError>;
