//! Error types for vpnctl
//!
//! These cover contract, configuration and internal failures. VPN operations
//! themselves never surface a `VpnctlError` to callers; they report through
//! [`crate::normalizer::OperationResult`] instead.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VpnctlError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// Parse error (command output, config file)
    #[error("Parse error: {0}")]
    Parse(String),
    /// Invalid parameter supplied by a caller
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Background service error (poller, dispatcher)
    #[error("Service error: {0}")]
    ServiceError(String),
}

impl From<serde_json::Error> for VpnctlError {
    fn from(error: serde_json::Error) -> Self {
        VpnctlError::Parse(error.to_string())
    }
}

impl From<toml::de::Error> for VpnctlError {
    fn from(error: toml::de::Error) -> Self {
        VpnctlError::Config(format!("Failed to parse config: {}", error))
    }
}

pub type VpnctlResult<T> = Result<T, VpnctlError>;
