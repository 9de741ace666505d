//! IPv4 forwarding control via the kernel's proc toggle.

use std::path::PathBuf;

use crate::error::{Result, UsbNetError};
use crate::system::command::Host;

/// Switches `/proc/sys/net/ipv4/ip_forward` (or a configured stand-in).
#[derive(Debug, Clone)]
pub struct IpForwarding {
    path: PathBuf,
}

impl IpForwarding {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the current forwarding state.
    pub async fn get_state(&self) -> Result<bool> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        match contents.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(UsbNetError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unexpected ip_forward value: {}", other),
            ))),
        }
    }

    pub async fn enable<H: Host>(&self, host: &H) -> Result<()> {
        self.set_state(host, true).await
    }

    pub async fn disable<H: Host>(&self, host: &H) -> Result<()> {
        self.set_state(host, false).await
    }

    async fn set_state<H: Host>(&self, host: &H, enabled: bool) -> Result<()> {
        let value = if enabled { "1" } else { "0" };
        host.write_file(&self.path, value).await
    }
}
