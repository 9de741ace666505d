//! usbnet - network provisioning for USB gadget modes.
//!
//! Brings the USB network interface up and down, writes the udhcpd config for
//! clients on the USB side, and sets up NAT towards the upstream (cellular)
//! connection, discovered through ConnMan when built with the `connman`
//! feature.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod mode;
pub mod system;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use config::NetworkConfig;
pub use error::{Result, UsbNetError};
pub use lifecycle::{DhcpSetup, NetworkLifecycle, UpdateOutcome};
pub use mode::{ModeConfig, ModeManager, StaticModeManager};
pub use upstream::{UpstreamAggregator, UpstreamInfo};
