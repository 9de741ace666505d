//! The USB mode manager seam: which mode is active and whether a cable is in.

use serde::{Deserialize, Serialize};

/// Network-related part of a USB mode definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Interface override for this mode (e.g. "rndis0").
    #[serde(default)]
    pub network_interface: Option<String>,
    /// Forward USB-side traffic to an upstream connection.
    #[serde(default)]
    pub nat: bool,
    /// Whether this mode uses networking at all.
    #[serde(default)]
    pub network: bool,
}

/// Supplies the active mode and the USB connection state.
///
/// Implemented by whatever owns the mode state machine.
pub trait ModeManager: Send + Sync {
    fn active_mode(&self) -> ModeConfig;

    fn is_connected(&self) -> bool;
}

/// A fixed mode and connection state, e.g. taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticModeManager {
    pub mode: ModeConfig,
    pub connected: bool,
}

impl StaticModeManager {
    pub fn new(mode: ModeConfig, connected: bool) -> Self {
        Self { mode, connected }
    }
}

impl ModeManager for StaticModeManager {
    fn active_mode(&self) -> ModeConfig {
        self.mode.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
