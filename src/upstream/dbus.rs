//! ConnMan over the system bus, via zbus.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, error};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::Connection;

use super::connman::ConnManBus;
use super::value::BusValue;
use crate::error::{Result, UsbNetError};

/// Upper bound for a single bus round trip.
const BUS_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[zbus::proxy(
    interface = "net.connman.Manager",
    default_service = "net.connman",
    default_path = "/",
    gen_blocking = false
)]
trait Manager {
    fn get_services(&self) -> zbus::Result<Vec<(OwnedObjectPath, HashMap<String, OwnedValue>)>>;
}

#[zbus::proxy(
    interface = "net.connman.Service",
    default_service = "net.connman",
    gen_blocking = false
)]
trait Service {
    fn get_properties(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    #[zbus(no_reply)]
    fn connect(&self) -> zbus::Result<()>;
}

/// System bus connection to ConnMan, opened on first use.
#[derive(Default)]
pub struct ZbusConnMan {
    connection: OnceCell<Connection>,
}

impl ZbusConnMan {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(&self) -> Result<&Connection> {
        self.connection
            .get_or_try_init(|| async {
                bounded("connect to system bus", Connection::system())
                    .await
                    .inspect_err(|e| error!(error = %e, "could not connect to dbus for connman"))
            })
            .await
    }

    async fn service_proxy(&self, service: &str) -> Result<ServiceProxy<'static>> {
        let connection = self.connection().await?;
        let builder = ServiceProxy::builder(connection)
            .path(service.to_string())
            .map_err(|e| UsbNetError::Bus(format!("bad service path {}: {}", service, e)))?;
        bounded("create service proxy", builder.build()).await
    }
}

impl ConnManBus for ZbusConnMan {
    async fn get_services(&self) -> Result<BusValue> {
        let connection = self.connection().await?;
        let manager = bounded("create manager proxy", ManagerProxy::new(connection)).await?;
        let services = bounded("GetServices", manager.get_services()).await?;

        Ok(BusValue::Array(
            services
                .iter()
                .map(|(path, props)| {
                    BusValue::Struct(vec![
                        BusValue::ObjectPath(path.to_string()),
                        properties_to_bus_value(props),
                    ])
                })
                .collect(),
        ))
    }

    async fn get_properties(&self, service: &str) -> Result<BusValue> {
        let proxy = self.service_proxy(service).await?;
        let props = bounded("GetProperties", proxy.get_properties()).await?;
        Ok(properties_to_bus_value(&props))
    }

    async fn connect(&self, service: &str) -> Result<()> {
        let proxy = self.service_proxy(service).await?;
        bounded("Connect", proxy.connect()).await?;
        debug!(service, "connect requested");
        Ok(())
    }
}

async fn bounded<T>(call: &'static str, fut: impl Future<Output = zbus::Result<T>>) -> Result<T> {
    match tokio::time::timeout(BUS_CALL_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(UsbNetError::Bus(format!("{}: {}", call, e))),
        Err(_) => Err(UsbNetError::BusTimeout(call)),
    }
}

fn properties_to_bus_value(props: &HashMap<String, OwnedValue>) -> BusValue {
    let mut entries: Vec<(String, BusValue)> = props
        .iter()
        .map(|(key, value)| (key.clone(), to_bus_value(value)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    BusValue::Dict(entries)
}

fn to_bus_value(value: &Value<'_>) -> BusValue {
    match value {
        Value::Str(s) => BusValue::Str(s.to_string()),
        Value::ObjectPath(p) => BusValue::ObjectPath(p.to_string()),
        Value::Value(inner) => to_bus_value(inner),
        Value::Array(array) => BusValue::Array(array.iter().map(to_bus_value).collect()),
        Value::Dict(dict) => BusValue::Dict(
            dict.iter()
                .map(|(key, value)| (key_string(key), to_bus_value(value)))
                .collect(),
        ),
        Value::Structure(structure) => {
            BusValue::Struct(structure.fields().iter().map(to_bus_value).collect())
        }
        other => BusValue::Scalar(format!("{:?}", other)),
    }
}

fn key_string(key: &Value<'_>) -> String {
    match to_bus_value(key) {
        BusValue::Str(s) | BusValue::ObjectPath(s) | BusValue::Scalar(s) => s,
        other => format!("{:?}", other),
    }
}
