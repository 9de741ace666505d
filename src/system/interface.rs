//! Choosing the USB network interface.

use tracing::debug;

use crate::config::NetworkConfig;

/// Interface used when neither the mode nor the config names one.
pub const DEFAULT_INTERFACE: &str = "usb0";

/// Pick the interface to operate on.
///
/// Precedence: the mode's own override, then the configured interface, then
/// [`DEFAULT_INTERFACE`].
pub fn resolve_interface(mode_override: Option<&str>, config: &NetworkConfig) -> String {
    let interface = mode_override
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or_else(|| config.interface())
        .unwrap_or(DEFAULT_INTERFACE)
        .to_string();

    debug!(interface = %interface, "resolved usb network interface");
    interface
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(interface: Option<&str>) -> NetworkConfig {
        NetworkConfig {
            interface: interface.map(String::from),
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_mode_override_wins() {
        let config = config_with(Some("usb1"));
        assert_eq!(resolve_interface(Some("rndis0"), &config), "rndis0");
    }

    #[test]
    fn test_config_used_without_override() {
        let config = config_with(Some("usb1"));
        assert_eq!(resolve_interface(None, &config), "usb1");
        assert_eq!(resolve_interface(Some(""), &config), "usb1");
    }

    #[test]
    fn test_default_as_last_resort() {
        assert_eq!(resolve_interface(None, &config_with(None)), "usb0");
    }
}
