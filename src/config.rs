//! Network settings persistence.
//!
//! Loads a small JSON config from `~/.config/usbnet/network.json` (or a path
//! given on the command line). A missing file yields the defaults; a broken one
//! is logged and also yields the defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, UsbNetError};

/// System-wide USB network settings.
///
/// Every field has a serde default so older config files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface used when the active mode doesn't name one.
    #[serde(default)]
    pub interface: Option<String>,

    /// Address for the USB side. `"dhcp"` asks a DHCP client instead.
    #[serde(default)]
    pub ip: Option<String>,

    /// Default gateway added after the address is set.
    #[serde(default)]
    pub gateway: Option<String>,

    /// Upstream interface for NAT; overrides whatever the aggregator finds.
    #[serde(default)]
    pub nat_interface: Option<String>,

    /// Where the DHCP server configuration is written.
    #[serde(default = "default_dhcpd_conf")]
    pub dhcpd_conf: PathBuf,

    /// Kernel IPv4 forwarding toggle.
    #[serde(default = "default_ip_forward")]
    pub ip_forward: PathBuf,

    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: PathBuf,

    #[serde(default = "default_route_table")]
    pub route_table: PathBuf,
}

fn default_dhcpd_conf() -> PathBuf {
    PathBuf::from("/etc/udhcpd.conf")
}

fn default_ip_forward() -> PathBuf {
    PathBuf::from("/proc/sys/net/ipv4/ip_forward")
}

fn default_resolv_conf() -> PathBuf {
    PathBuf::from("/etc/resolv.conf")
}

fn default_route_table() -> PathBuf {
    PathBuf::from("/proc/net/route")
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            ip: None,
            gateway: None,
            nat_interface: None,
            dhcpd_conf: default_dhcpd_conf(),
            ip_forward: default_ip_forward(),
            resolv_conf: default_resolv_conf(),
            route_table: default_route_table(),
        }
    }
}

/// Treat `Some("")` the same as an unset value.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl NetworkConfig {
    /// Default config file path: `~/.config/usbnet/network.json`.
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("usbnet").join("network.json"))
    }

    /// Load from the default location.
    pub fn load() -> Self {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = fs::read_to_string(path) else {
            return Self::default();
        };

        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparsable network config");
                Self::default()
            }
        }
    }

    /// Save to `path`, creating parent directories if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| UsbNetError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| UsbNetError::Io(std::io::Error::other(e)))?;

        fs::write(path, json).map_err(|source| UsbNetError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn interface(&self) -> Option<&str> {
        non_empty(&self.interface)
    }

    pub fn ip(&self) -> Option<&str> {
        non_empty(&self.ip)
    }

    pub fn gateway(&self) -> Option<&str> {
        non_empty(&self.gateway)
    }

    pub fn nat_interface(&self) -> Option<&str> {
        non_empty(&self.nat_interface)
    }
}
