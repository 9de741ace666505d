//! udhcpd configuration for clients on the USB side.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, UsbNetError};
use crate::system::command::Host;
use crate::upstream::UpstreamInfo;

/// USB-side address used when none is configured.
pub const DEFAULT_BASE_IP: &str = "192.168.2.15";

const SUBNET_MASK: &str = "255.255.255.0";

/// Only this many leading characters are searched for the network prefix.
const PREFIX_SCAN_LIMIT: usize = 15;

/// Lease range handed out to USB clients: `<a.b.c>.1` to `<a.b.c>.10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    pub start: String,
    pub end: String,
}

impl AddressRange {
    /// Derive the range from the first three octets of `base_ip`.
    pub fn from_base(base_ip: &str) -> Result<Self> {
        let mut dots = 0;
        let prefix_len = base_ip
            .char_indices()
            .take(PREFIX_SCAN_LIMIT)
            .find_map(|(i, c)| {
                if c == '.' {
                    dots += 1;
                }
                (dots == 3).then_some(i + 1)
            })
            .ok_or_else(|| UsbNetError::InvalidBaseAddress(base_ip.to_string()))?;

        let prefix = &base_ip[..prefix_len];
        Ok(Self {
            start: format!("{}1", prefix),
            end: format!("{}10", prefix),
        })
    }
}

/// A rendered udhcpd configuration.
///
/// Without upstream info this is the simple config; with it, clients are also
/// told about the DNS servers and that the USB-side address is their router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpConfig {
    pub range: AddressRange,
    pub interface: String,
    pub dns: Option<Vec<String>>,
    pub router: Option<String>,
}

impl DhcpConfig {
    pub fn new(interface: &str, base_ip: &str, upstream: Option<&UpstreamInfo>) -> Result<Self> {
        let range = AddressRange::from_base(base_ip)?;
        let (dns, router) = match upstream {
            Some(info) => (Some(info.dns_servers()), Some(base_ip.to_string())),
            None => (None, None),
        };

        Ok(Self {
            range,
            interface: interface.to_string(),
            dns,
            router,
        })
    }

    /// Tab separated key/value lines in udhcpd's format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "start\t{}", self.range.start);
        let _ = writeln!(out, "end\t{}", self.range.end);
        let _ = writeln!(out, "interface\t{}", self.interface);
        let _ = writeln!(out, "option\tsubnet\t{}", SUBNET_MASK);
        if let Some(ref dns) = self.dns {
            let _ = writeln!(out, "opt\tdns\t{}", dns.join(" "));
        }
        if let Some(ref router) = self.router {
            let _ = writeln!(out, "opt\trouter\t{}", router);
        }
        out
    }
}

/// Write the DHCP server configuration for `interface`.
///
/// The file is replaced through [`Host::replace_file`], so a failed write
/// never leaves a truncated config behind. Running it again with the same
/// inputs produces the same bytes.
pub async fn write_dhcpd_conf<H: Host>(
    host: &H,
    path: &Path,
    interface: &str,
    base_ip: Option<&str>,
    upstream: Option<&UpstreamInfo>,
) -> Result<DhcpConfig> {
    let base_ip = base_ip.unwrap_or(DEFAULT_BASE_IP);
    let config = DhcpConfig::new(interface, base_ip, upstream)?;

    if let Err(e) = host.replace_file(path, &config.render()).await {
        warn!(path = %path.display(), error = %e, "error writing dhcp server config");
        return Err(e);
    }

    debug!(
        path = %path.display(),
        interface,
        forwarding = upstream.is_some(),
        "dhcp server config written"
    );
    Ok(config)
}
