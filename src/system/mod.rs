//! System interaction modules for commands, interfaces, DHCP, forwarding and NAT.

pub mod command;
pub mod dhcp;
pub mod firewall;
pub mod interface;
pub mod sysctl;

pub use command::{Host, HostCommand, Report, Step, StepStatus, SystemHost};
pub use dhcp::{write_dhcpd_conf, AddressRange, DhcpConfig};
pub use firewall::Firewall;
pub use interface::{resolve_interface, DEFAULT_INTERFACE};
pub use sysctl::IpForwarding;
