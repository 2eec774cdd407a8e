//! Subsystem configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How hot-plug detection should be established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotplugPreference {
    /// Prefer the udev monitor, fall back to a directory watch
    #[default]
    Auto,
    /// udev monitor only; no hotplug if it cannot be initialized
    DeviceManager,
    /// Directory watch only
    DirectoryWatch,
    /// Startup scan only, no live hotplug
    Disabled,
}

/// Tunables for a [`GamepadSystem`](crate::GamepadSystem)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Directory scanned for `event*` device nodes
    pub device_dir: PathBuf,
    /// Capacity of the pending-add retry ring
    pub pending_capacity: usize,
    /// Hot-plug strategy selection
    pub hotplug: HotplugPreference,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from("/dev/input"),
            pending_capacity: 32,
            hotplug: HotplugPreference::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SystemConfig::default();
        assert_eq!(config.device_dir, PathBuf::from("/dev/input"));
        assert_eq!(config.pending_capacity, 32);
        assert_eq!(config.hotplug, HotplugPreference::Auto);
    }
}
