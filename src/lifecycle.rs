//! Bringing USB networking up and down for the active mode.
//!
//! All operations take the same transition lock, so an `update` racing with a
//! mode switch can't interleave commands on the interface.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::{Result, UsbNetError};
use crate::mode::{ModeConfig, ModeManager};
use crate::system::command::{Host, HostCommand, Report};
use crate::system::dhcp::{write_dhcpd_conf, DhcpConfig, DEFAULT_BASE_IP};
use crate::system::firewall::Firewall;
use crate::system::interface::resolve_interface;
use crate::system::sysctl::IpForwarding;
use crate::upstream::UpstreamAggregator;

/// Configured IP value that means "ask a DHCP client".
const DHCP_TOKEN: &str = "dhcp";

/// Result of [`NetworkLifecycle::set_up_dhcp_server`].
#[derive(Debug)]
pub enum DhcpSetup {
    /// NAT was requested but no upstream connection could be found. Nothing
    /// was written, so an older config file stays in place.
    UpstreamUnavailable(UsbNetError),
    Configured {
        written: Result<DhcpConfig>,
        /// `None` when the mode doesn't use NAT.
        forwarding: Option<Result<Report>>,
    },
}

/// Result of [`NetworkLifecycle::update`].
#[derive(Debug)]
pub enum UpdateOutcome {
    NotConnected,
    NetworkNotUsed,
    /// The interface was taken down and brought up again.
    Reset(Report),
}

pub struct NetworkLifecycle<H, M, A> {
    host: H,
    config: NetworkConfig,
    modes: M,
    aggregator: A,
    firewall: Firewall,
    transition: Mutex<()>,
}

impl<H, M, A> NetworkLifecycle<H, M, A>
where
    H: Host,
    M: ModeManager,
    A: UpstreamAggregator,
{
    pub fn new(host: H, config: NetworkConfig, modes: M, aggregator: A) -> Self {
        let firewall = Firewall::new(IpForwarding::new(config.ip_forward.clone()));
        Self {
            host,
            config,
            modes,
            aggregator,
            firewall,
            transition: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    pub fn interface_for(&self, mode: &ModeConfig) -> String {
        resolve_interface(mode.network_interface.as_deref(), &self.config)
    }

    /// Give the interface its address and default route.
    pub async fn up(&self, mode: &ModeConfig) -> Report {
        let _guard = self.transition.lock().await;
        self.bring_up(mode).await
    }

    /// Take the interface down, and NAT with it when the mode used NAT.
    pub async fn down(&self, mode: &ModeConfig) -> Report {
        let _guard = self.transition.lock().await;
        self.take_down(mode).await
    }

    /// Write the DHCP server config and, for NAT modes, set up forwarding.
    pub async fn set_up_dhcp_server(&self, mode: &ModeConfig) -> DhcpSetup {
        let _guard = self.transition.lock().await;
        let interface = self.interface_for(mode);

        let upstream = if mode.nat {
            match self.aggregator.aggregate().await {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(error = %e, "data connection not available");
                    return DhcpSetup::UpstreamUnavailable(e);
                }
            }
        } else {
            None
        };

        let written = write_dhcpd_conf(
            &self.host,
            &self.config.dhcpd_conf,
            &interface,
            self.config.ip(),
            upstream.as_ref(),
        )
        .await;
        if let Err(ref e) = written {
            warn!(error = %e, "dhcp server config not written");
        }

        let forwarding = match upstream {
            Some(info) => {
                let uplink = self
                    .config
                    .nat_interface()
                    .map(str::to_string)
                    .or(info.nat_interface);
                Some(match uplink {
                    Some(uplink) => self.firewall.enable(&self.host, &interface, &uplink).await,
                    None => Err(UsbNetError::NoUpstreamInterface),
                })
            }
            None => None,
        };

        DhcpSetup::Configured {
            written,
            forwarding,
        }
    }

    /// Re-apply the network settings if a networking mode is active.
    pub async fn update(&self) -> UpdateOutcome {
        if !self.modes.is_connected() {
            return UpdateOutcome::NotConnected;
        }

        let mode = self.modes.active_mode();
        if !mode.network {
            return UpdateOutcome::NetworkNotUsed;
        }

        let _guard = self.transition.lock().await;
        let mut report = self.take_down(&mode).await;
        report.extend(self.bring_up(&mode).await);
        UpdateOutcome::Reset(report)
    }

    async fn bring_up(&self, mode: &ModeConfig) -> Report {
        let interface = self.interface_for(mode);
        let mut report = Report::new();

        let Some(ip) = self.config.ip() else {
            let cmd = HostCommand::new("ifconfig").args([interface.as_str(), DEFAULT_BASE_IP]);
            let result = self.host.run(&cmd).await;
            report.record(cmd.to_string(), &result);
            info!(
                interface = %interface,
                ip = DEFAULT_BASE_IP,
                "usb network up with fallback address"
            );
            return report;
        };

        if ip == DHCP_TOKEN {
            let primary = HostCommand::new("dhclient").args(["-1", interface.as_str()]);
            let result = self.host.run(&primary).await;
            if !report.record(primary.to_string(), &result) {
                debug!(interface = %interface, "dhclient failed, trying udhcpc");
                let secondary =
                    HostCommand::new("udhcpc").args(["-n", "-q", "-i", interface.as_str()]);
                let result = self.host.run(&secondary).await;
                report.record(secondary.to_string(), &result);
            }
        } else {
            let cmd = HostCommand::new("ifconfig").args([interface.as_str(), ip]);
            let result = self.host.run(&cmd).await;
            report.record(cmd.to_string(), &result);
        }

        if let Some(gateway) = self.config.gateway() {
            let cmd = HostCommand::new("route").args(["add", "default", "gw", gateway]);
            let result = self.host.run(&cmd).await;
            report.record(cmd.to_string(), &result);
        }

        info!(interface = %interface, ip, clean = report.is_clean(), "usb network up");
        report
    }

    async fn take_down(&self, mode: &ModeConfig) -> Report {
        let interface = self.interface_for(mode);
        let mut report = Report::new();

        let cmd = HostCommand::new("ifconfig").args([interface.as_str(), "down"]);
        let result = self.host.run(&cmd).await;
        report.record(cmd.to_string(), &result);

        if mode.nat {
            report.extend(self.firewall.disable(&self.host).await);
        }

        info!(interface = %interface, clean = report.is_clean(), "usb network down");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::StaticModeManager;
    use crate::testing::RecordingHost;
    use crate::upstream::UpstreamInfo;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out a fixed upstream, or fails when there is none.
    struct FixedAggregator {
        info: Option<UpstreamInfo>,
        calls: AtomicUsize,
    }

    impl FixedAggregator {
        fn new(info: Option<UpstreamInfo>) -> Self {
            Self {
                info,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl UpstreamAggregator for FixedAggregator {
        async fn aggregate(&self) -> Result<UpstreamInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.info.clone().ok_or(UsbNetError::NoCellularService)
        }
    }

    fn cellular() -> UpstreamInfo {
        UpstreamInfo {
            dns_primary: Some("8.8.8.8".into()),
            dns_secondary: Some("8.8.4.4".into()),
            nat_interface: Some("rmnet0".into()),
        }
    }

    fn nat_mode() -> ModeConfig {
        ModeConfig {
            network_interface: None,
            nat: true,
            network: true,
        }
    }

    fn plain_mode() -> ModeConfig {
        ModeConfig {
            network: true,
            ..ModeConfig::default()
        }
    }

    fn lifecycle(
        config: NetworkConfig,
        modes: StaticModeManager,
        upstream: Option<UpstreamInfo>,
        host: RecordingHost,
    ) -> NetworkLifecycle<RecordingHost, StaticModeManager, FixedAggregator> {
        NetworkLifecycle::new(host, config, modes, FixedAggregator::new(upstream))
    }

    const DHCPD_CONF: &str = "/etc/udhcpd.conf";

    fn dhcp_config() -> NetworkConfig {
        NetworkConfig {
            dhcpd_conf: DHCPD_CONF.into(),
            ..NetworkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_up_without_ip_uses_fallback_address() {
        let config = NetworkConfig {
            gateway: Some("192.168.2.14".into()),
            ..NetworkConfig::default()
        };
        let net = lifecycle(config, StaticModeManager::default(), None, RecordingHost::new());

        let report = net.up(&plain_mode()).await;
        assert!(report.is_clean());
        assert_eq!(net.host.command_lines(), vec!["ifconfig usb0 192.168.2.15"]);
    }

    #[tokio::test]
    async fn test_up_with_static_ip_and_gateway() {
        let config = NetworkConfig {
            ip: Some("10.0.0.2".into()),
            gateway: Some("10.0.0.1".into()),
            ..NetworkConfig::default()
        };
        let mode = ModeConfig {
            network_interface: Some("rndis0".into()),
            ..plain_mode()
        };
        let net = lifecycle(config, StaticModeManager::default(), None, RecordingHost::new());

        net.up(&mode).await;
        assert_eq!(
            net.host.command_lines(),
            vec!["ifconfig rndis0 10.0.0.2", "route add default gw 10.0.0.1"]
        );
    }

    #[tokio::test]
    async fn test_up_dhcp_uses_primary_client() {
        let config = NetworkConfig {
            ip: Some("dhcp".into()),
            ..NetworkConfig::default()
        };
        let net = lifecycle(config, StaticModeManager::default(), None, RecordingHost::new());

        net.up(&plain_mode()).await;
        assert_eq!(net.host.command_lines(), vec!["dhclient -1 usb0"]);
    }

    #[tokio::test]
    async fn test_up_dhcp_falls_back_to_udhcpc() {
        let config = NetworkConfig {
            ip: Some("dhcp".into()),
            ..NetworkConfig::default()
        };
        let host = RecordingHost::new().fail_when("dhclient");
        let net = lifecycle(config, StaticModeManager::default(), None, host);

        let report = net.up(&plain_mode()).await;
        assert_eq!(
            net.host.command_lines(),
            vec!["dhclient -1 usb0", "udhcpc -n -q -i usb0"]
        );
        assert_eq!(report.failures().count(), 1);
    }

    #[tokio::test]
    async fn test_down_flushes_nat_only_for_nat_modes() {
        let net = lifecycle(
            NetworkConfig::default(),
            StaticModeManager::default(),
            None,
            RecordingHost::new(),
        );

        net.down(&plain_mode()).await;
        assert_eq!(net.host.command_lines(), vec!["ifconfig usb0 down"]);

        net.down(&nat_mode()).await;
        assert_eq!(
            net.host.command_lines(),
            vec![
                "ifconfig usb0 down",
                "ifconfig usb0 down",
                "/sbin/iptables -F FORWARD"
            ]
        );
    }

    #[tokio::test]
    async fn test_dhcp_server_simple_mode() {
        let config = dhcp_config();
        let net = lifecycle(config, StaticModeManager::default(), None, RecordingHost::new());

        let setup = net.set_up_dhcp_server(&plain_mode()).await;
        let DhcpSetup::Configured {
            written,
            forwarding,
        } = setup
        else {
            panic!("expected a written config");
        };
        assert!(written.is_ok());
        assert!(forwarding.is_none());
        assert_eq!(net.aggregator.calls.load(Ordering::SeqCst), 0);

        let contents = net.host.file(Path::new(DHCPD_CONF)).unwrap();
        assert!(!contents.contains("opt\tdns"));
        assert!(!contents.contains("opt\trouter"));
    }

    #[tokio::test]
    async fn test_dhcp_server_with_nat() {
        let config = dhcp_config();
        let net = lifecycle(
            config,
            StaticModeManager::default(),
            Some(cellular()),
            RecordingHost::new(),
        );

        let setup = net.set_up_dhcp_server(&nat_mode()).await;
        let DhcpSetup::Configured {
            written,
            forwarding: Some(Ok(report)),
        } = setup
        else {
            panic!("expected forwarding to be configured");
        };
        assert!(written.is_ok());
        assert!(report.is_clean());

        let contents = net.host.file(Path::new(DHCPD_CONF)).unwrap();
        assert!(contents.contains("opt\tdns\t8.8.8.8 8.8.4.4\n"));
        assert!(contents.contains("opt\trouter\t192.168.2.15\n"));
        assert!(net
            .host
            .command_lines()
            .contains(&"/sbin/iptables -t nat -A POSTROUTING -o rmnet0 -j MASQUERADE".to_string()));
    }

    #[tokio::test]
    async fn test_configured_nat_interface_overrides_upstream() {
        let config = NetworkConfig {
            nat_interface: Some("wwan0".into()),
            ..dhcp_config()
        };
        let net = lifecycle(
            config,
            StaticModeManager::default(),
            Some(cellular()),
            RecordingHost::new(),
        );

        net.set_up_dhcp_server(&nat_mode()).await;
        assert!(net
            .host
            .command_lines()
            .iter()
            .all(|line| !line.contains("rmnet0")));
        assert!(net
            .host
            .command_lines()
            .contains(&"/sbin/iptables -A FORWARD -i usb0 -o wwan0 -j ACCEPT".to_string()));
    }

    #[tokio::test]
    async fn test_dhcp_server_skipped_without_upstream() {
                let net = lifecycle(
            dhcp_config(),
            StaticModeManager::default(),
            None,
            RecordingHost::new(),
        );

        let setup = net.set_up_dhcp_server(&nat_mode()).await;
        assert!(matches!(setup, DhcpSetup::UpstreamUnavailable(_)));
        assert!(net.host.file(Path::new(DHCPD_CONF)).is_none());
        assert!(net.host.command_lines().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_without_interface_skips_rules() {
        let upstream = UpstreamInfo {
            nat_interface: None,
            ..cellular()
        };
        let net = lifecycle(
            dhcp_config(),
            StaticModeManager::default(),
            Some(upstream),
            RecordingHost::new(),
        );

        let setup = net.set_up_dhcp_server(&nat_mode()).await;
        assert!(matches!(
            setup,
            DhcpSetup::Configured {
                written: Ok(_),
                forwarding: Some(Err(UsbNetError::NoUpstreamInterface)),
            }
        ));
        assert!(net.host.command_lines().is_empty());
    }

    #[tokio::test]
    async fn test_update_is_noop_when_disconnected() {
        let modes = StaticModeManager::new(nat_mode(), false);
        let net = lifecycle(NetworkConfig::default(), modes, None, RecordingHost::new());

        assert!(matches!(net.update().await, UpdateOutcome::NotConnected));
        assert!(net.host.command_lines().is_empty());
    }

    #[tokio::test]
    async fn test_update_is_noop_for_non_network_mode() {
        let modes = StaticModeManager::new(ModeConfig::default(), true);
        let net = lifecycle(NetworkConfig::default(), modes, None, RecordingHost::new());

        assert!(matches!(net.update().await, UpdateOutcome::NetworkNotUsed));
        assert!(net.host.command_lines().is_empty());
    }

    #[tokio::test]
    async fn test_update_resets_interface() {
        let config = NetworkConfig {
            ip: Some("10.0.0.2".into()),
            ..NetworkConfig::default()
        };
        let modes = StaticModeManager::new(plain_mode(), true);
        let net = lifecycle(config, modes, None, RecordingHost::new());

        let UpdateOutcome::Reset(report) = net.update().await else {
            panic!("expected a reset");
        };
        assert_eq!(report.steps().len(), 2);
        assert_eq!(
            net.host.command_lines(),
            vec!["ifconfig usb0 down", "ifconfig usb0 10.0.0.2"]
        );
    }
}
