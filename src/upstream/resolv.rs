//! Upstream info from the local resolver config and routing table.
//!
//! Used when the build has no connection manager integration.

use std::path::PathBuf;

use tracing::debug;

use super::{UpstreamAggregator, UpstreamInfo};
use crate::error::{Result, UsbNetError};

/// Reads `resolv.conf` for DNS and `/proc/net/route` for the uplink.
#[derive(Debug, Clone)]
pub struct ResolvConfAggregator {
    resolv_conf: PathBuf,
    route_table: PathBuf,
}

impl ResolvConfAggregator {
    pub fn new(resolv_conf: PathBuf, route_table: PathBuf) -> Self {
        Self {
            resolv_conf,
            route_table,
        }
    }
}

impl UpstreamAggregator for ResolvConfAggregator {
    async fn aggregate(&self) -> Result<UpstreamInfo> {
        let resolv = tokio::fs::read_to_string(&self.resolv_conf).await?;
        let mut servers = parse_nameservers(&resolv).into_iter();
        let Some(primary) = servers.next() else {
            return Err(UsbNetError::NoNameservers(self.resolv_conf.clone()));
        };
        let secondary = servers.next().unwrap_or_else(|| primary.clone());

        // No route table just means the uplink has to come from config.
        let nat_interface = match tokio::fs::read_to_string(&self.route_table).await {
            Ok(table) => parse_default_route_interface(&table),
            Err(e) => {
                debug!(path = %self.route_table.display(), error = %e, "route table unreadable");
                None
            }
        };

        debug!(dns1 = %primary, dns2 = %secondary, uplink = ?nat_interface, "local upstream info");
        Ok(UpstreamInfo {
            dns_primary: Some(primary),
            dns_secondary: Some(secondary),
            nat_interface,
        })
    }
}

/// `nameserver` entries in file order, duplicates removed.
fn parse_nameservers(output: &str) -> Vec<String> {
    let mut servers: Vec<String> = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let mut fields = trimmed.split_whitespace();
        if fields.next() != Some("nameserver") {
            continue;
        }
        if let Some(server) = fields.next() {
            if !servers.iter().any(|s| s == server) {
                servers.push(server.to_string());
            }
        }
    }

    servers
}

/// Interface of the first default route in `/proc/net/route` format.
fn parse_default_route_interface(table: &str) -> Option<String> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Iface Destination Gateway Flags RefCnt Use Metric Mask ...
        match fields.as_slice() {
            [iface, "00000000", _, _, _, _, _, "00000000", ..] => Some(iface.to_string()),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
usb0\t0002A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
rmnet0\t00000000\t0100000A\t0003\t0\t0\t0\t00000000\t0\t0\t0
";

    #[test]
    fn test_parse_nameservers() {
        let resolv = "\
# generated by connman
search lan
nameserver 10.0.0.1
nameserver   10.0.0.2
;nameserver 10.0.0.3
nameserver 10.0.0.1
";
        assert_eq!(parse_nameservers(resolv), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_parse_default_route() {
        assert_eq!(
            parse_default_route_interface(ROUTE_TABLE).as_deref(),
            Some("rmnet0")
        );
        assert_eq!(parse_default_route_interface("Iface\tDestination\n"), None);
    }

    #[tokio::test]
    async fn test_aggregate_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let resolv = dir.path().join("resolv.conf");
        let route = dir.path().join("route");
        std::fs::write(&resolv, "nameserver 1.1.1.1\n").unwrap();
        std::fs::write(&route, ROUTE_TABLE).unwrap();

        let info = ResolvConfAggregator::new(resolv, route)
            .aggregate()
            .await
            .unwrap();
        assert_eq!(info.dns_primary.as_deref(), Some("1.1.1.1"));
        assert_eq!(info.dns_secondary.as_deref(), Some("1.1.1.1"));
        assert_eq!(info.nat_interface.as_deref(), Some("rmnet0"));
    }

    #[tokio::test]
    async fn test_aggregate_without_nameservers_fails() {
        let dir = tempfile::tempdir().unwrap();
        let resolv = dir.path().join("resolv.conf");
        std::fs::write(&resolv, "search lan\n").unwrap();

        let err = ResolvConfAggregator::new(resolv, dir.path().join("no-route"))
            .aggregate()
            .await
            .unwrap_err();
        assert!(matches!(err, UsbNetError::NoNameservers(_)));
    }
}
