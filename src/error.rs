//! Error types for USB network provisioning.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsbNetError {
    #[error("Command failed: {command} - {message}")]
    CommandFailed { command: String, message: String },

    #[error("Permission denied. Run as root.")]
    PermissionDenied,

    #[error("Cannot write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Base address {0:?} does not have three dotted octets")]
    InvalidBaseAddress(String),

    #[error("No upstream interface known for NAT")]
    NoUpstreamInterface,

    #[error("No cellular service offered by the connection manager")]
    NoCellularService,

    #[error("Cellular service {0} is not online after activation")]
    ServiceNotOnline(String),

    #[error("No nameservers found in {0}")]
    NoNameservers(PathBuf),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Bus call {0} timed out")]
    BusTimeout(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UsbNetError>;
