//! Cellular uplink discovery through ConnMan.
//!
//! One attempt runs: list services, pick the cellular one, read its
//! properties. If the service isn't online yet it is told to connect, given a
//! grace period, and read exactly once more.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::value::BusValue;
use super::{UpstreamAggregator, UpstreamInfo};
use crate::error::{Result, UsbNetError};

/// How long an activated service gets before its properties are read again.
pub const ACTIVATION_GRACE: Duration = Duration::from_secs(3);

const CELLULAR_MARKER: &str = "cellular";
const STATE_ONLINE: &str = "online";

/// The three ConnMan calls the aggregator makes.
pub trait ConnManBus: Send + Sync {
    /// `Manager.GetServices`: an array of `(object path, properties)` structs.
    fn get_services(&self) -> impl Future<Output = Result<BusValue>> + Send;

    /// `Service.GetProperties` on `service`: a property dictionary.
    fn get_properties(&self, service: &str) -> impl Future<Output = Result<BusValue>> + Send;

    /// `Service.Connect` on `service`, sent without waiting for a reply.
    fn connect(&self, service: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Result of reading one property dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceReadiness {
    /// A DNS pair was read.
    Ready,
    /// Offline, or online without usable nameservers yet.
    NotReady,
}

/// Object path of the first service whose path mentions "cellular".
pub fn find_cellular_service(services: &BusValue) -> Option<String> {
    services
        .as_array()?
        .iter()
        .filter_map(|record| {
            record
                .as_struct()?
                .iter()
                .find_map(BusValue::as_object_path)
        })
        .inspect(|path| debug!(service = %path, "connman service"))
        .find(|path| path.contains(CELLULAR_MARKER))
        .map(str::to_string)
}

/// Pull the uplink interface and DNS pair out of a service's properties.
///
/// `Ethernet.Interface` is recorded whenever present. A `State` other than
/// "online" means not ready, as does a `Nameservers` array that is empty or
/// doesn't hold strings. Only a pair of nameservers makes the service ready.
pub fn read_service_properties(props: &BusValue, info: &mut UpstreamInfo) -> ServiceReadiness {
    if let Some(interface) = props
        .get("Ethernet")
        .and_then(|ethernet| ethernet.get("Interface"))
        .and_then(BusValue::as_str)
    {
        debug!(interface, "cellular interface");
        info.nat_interface = Some(interface.to_string());
    }

    if let Some(state) = props.get("State").and_then(BusValue::as_str) {
        debug!(state, "connection state");
        if state != STATE_ONLINE {
            return ServiceReadiness::NotReady;
        }
    }

    let Some(nameservers) = props.get("Nameservers").and_then(BusValue::as_array) else {
        return ServiceReadiness::NotReady;
    };

    match nameservers {
        [BusValue::Str(primary), BusValue::Str(secondary), ..] => {
            debug!(dns1 = %primary, dns2 = %secondary, "nameservers");
            info.dns_primary = Some(primary.clone());
            info.dns_secondary = Some(secondary.clone());
            ServiceReadiness::Ready
        }
        _ => ServiceReadiness::NotReady,
    }
}

/// Bus-backed aggregator.
pub struct ConnManAggregator<B> {
    bus: B,
    grace: Duration,
}

impl<B: ConnManBus> ConnManAggregator<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            grace: ACTIVATION_GRACE,
        }
    }

    /// Override the wait between `Connect` and the second property read.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    async fn query(&self, service: &str) -> Result<(ServiceReadiness, UpstreamInfo)> {
        let props = self.bus.get_properties(service).await?;
        let mut info = UpstreamInfo::default();
        let readiness = read_service_properties(&props, &mut info);
        Ok((readiness, info))
    }
}

impl<B: ConnManBus> UpstreamAggregator for ConnManAggregator<B> {
    async fn aggregate(&self) -> Result<UpstreamInfo> {
        let services = self.bus.get_services().await?;
        let Some(service) = find_cellular_service(&services) else {
            debug!("no cellular service found");
            return Err(UsbNetError::NoCellularService);
        };
        debug!(service = %service, "cellular service found");

        if let (ServiceReadiness::Ready, info) = self.query(&service).await? {
            return Ok(info);
        }

        info!(service = %service, "cellular data not online, connecting");
        self.bus.connect(&service).await?;
        tokio::time::sleep(self.grace).await;

        match self.query(&service).await? {
            (ServiceReadiness::Ready, info) => Ok(info),
            (ServiceReadiness::NotReady, _) => {
                warn!(service = %service, "cannot connect to cellular data");
                Err(UsbNetError::ServiceNotOnline(service))
            }
        }
    }
}
