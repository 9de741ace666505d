//! NAT between the USB interface and the upstream connection, via iptables.
//!
//! `disable` flushes the whole FORWARD chain, not only the rules added by
//! `enable`. Anything else on the device that keeps FORWARD rules loses them
//! when USB networking goes down.

use tracing::{debug, warn};

use crate::error::{Result, UsbNetError};
use crate::system::command::{Host, HostCommand, Report};
use crate::system::sysctl::IpForwarding;

const IPTABLES: &str = "/sbin/iptables";

/// Turns forwarding plus the masquerade rules on and off.
///
/// Steps are independent: a failing rule doesn't undo the earlier ones, so
/// every `enable` has to be paired with a `disable`.
#[derive(Debug, Clone)]
pub struct Firewall {
    ip_forwarding: IpForwarding,
}

impl Firewall {
    pub fn new(ip_forwarding: IpForwarding) -> Self {
        Self { ip_forwarding }
    }

    /// Forward traffic from `interface` out through `upstream`.
    ///
    /// An empty upstream name is refused before anything is touched.
    pub async fn enable<H: Host>(
        &self,
        host: &H,
        interface: &str,
        upstream: &str,
    ) -> Result<Report> {
        if upstream.trim().is_empty() {
            return Err(UsbNetError::NoUpstreamInterface);
        }

        let mut report = Report::new();
        let result = self.ip_forwarding.enable(host).await;
        report.record("enable ip forwarding", &result);

        for rule in nat_rules(interface, upstream) {
            let result = host.run(&rule).await;
            if let Err(ref e) = result {
                warn!(command = %rule, error = %e, "iptables rule failed");
            }
            report.record(rule.to_string(), &result);
        }

        if report.is_clean() {
            debug!(interface, upstream, "ip forwarding enabled");
        }
        Ok(report)
    }

    /// Turn forwarding off and flush the FORWARD chain.
    pub async fn disable<H: Host>(&self, host: &H) -> Report {
        let mut report = Report::new();
        let result = self.ip_forwarding.disable(host).await;
        report.record("disable ip forwarding", &result);

        let flush = HostCommand::new(IPTABLES).args(["-F", "FORWARD"]);
        let result = host.run(&flush).await;
        if let Err(ref e) = result {
            warn!(error = %e, "flushing FORWARD chain failed");
        }
        report.record(flush.to_string(), &result);
        report
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        self.ip_forwarding.get_state().await
    }
}

/// Masquerade out of `upstream`, let replies back in, let the USB side out.
fn nat_rules(interface: &str, upstream: &str) -> [HostCommand; 3] {
    [
        HostCommand::new(IPTABLES).args([
            "-t",
            "nat",
            "-A",
            "POSTROUTING",
            "-o",
            upstream,
            "-j",
            "MASQUERADE",
        ]),
        HostCommand::new(IPTABLES).args([
            "-A",
            "FORWARD",
            "-i",
            upstream,
            "-o",
            interface,
            "-m",
            "state",
            "--state",
            "RELATED,ESTABLISHED",
            "-j",
            "ACCEPT",
        ]),
        HostCommand::new(IPTABLES).args([
            "-A", "FORWARD", "-i", interface, "-o", upstream, "-j", "ACCEPT",
        ]),
    ]
}
