//! Upstream connection discovery for NAT.
//!
//! With the `connman` feature the cellular data service is found, activated if
//! needed and read over the system bus. Without it, the local resolver config
//! and routing table are used instead.

pub mod connman;
#[cfg(feature = "connman")]
pub mod dbus;
pub mod resolv;
pub mod value;

use std::future::Future;

use crate::config::NetworkConfig;
use crate::error::Result;

pub use connman::{ConnManAggregator, ConnManBus};
pub use resolv::ResolvConfAggregator;
pub use value::BusValue;

/// What NAT setup needs to know about the upstream connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamInfo {
    pub dns_primary: Option<String>,
    pub dns_secondary: Option<String>,
    /// Interface carrying the upstream traffic (e.g. "rmnet0").
    pub nat_interface: Option<String>,
}

impl UpstreamInfo {
    /// The known DNS servers, primary first.
    pub fn dns_servers(&self) -> Vec<String> {
        self.dns_primary
            .iter()
            .chain(self.dns_secondary.iter())
            .cloned()
            .collect()
    }
}

/// Produces [`UpstreamInfo`] for one provisioning attempt.
pub trait UpstreamAggregator: Send + Sync {
    fn aggregate(&self) -> impl Future<Output = Result<UpstreamInfo>> + Send;
}

#[cfg(feature = "connman")]
pub type DefaultAggregator = ConnManAggregator<dbus::ZbusConnMan>;

#[cfg(not(feature = "connman"))]
pub type DefaultAggregator = ResolvConfAggregator;

/// The aggregator this build was compiled for.
#[cfg(feature = "connman")]
pub fn default_aggregator(_config: &NetworkConfig) -> DefaultAggregator {
    ConnManAggregator::new(dbus::ZbusConnMan::new())
}

/// The aggregator this build was compiled for.
#[cfg(not(feature = "connman"))]
pub fn default_aggregator(config: &NetworkConfig) -> DefaultAggregator {
    ResolvConfAggregator::new(config.resolv_conf.clone(), config.route_table.clone())
}
