//! Per-owner preferences and device bindings.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::lenient;

/// Wire value stored when no device is active.
pub const NO_ACTIVE_DEVICE: &str = "No active device";

/// Mileage default used for new components when settings carry none.
pub const DEFAULT_COMPONENT_MILEAGE: f64 = 1000.0;

/// The tracking device whose channel is currently followed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum ActiveDevice {
    /// No device is bound.
    #[default]
    None,
    /// The device with this name is bound.
    Named(String),
}

impl ActiveDevice {
    /// The device name, if one is bound.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl From<Option<String>> for ActiveDevice {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(name) if !name.is_empty() && name != NO_ACTIVE_DEVICE => Self::Named(name),
            _ => Self::None,
        }
    }
}

impl From<ActiveDevice> for String {
    fn from(value: ActiveDevice) -> Self {
        match value {
            ActiveDevice::None => NO_ACTIVE_DEVICE.to_string(),
            ActiveDevice::Named(name) => name,
        }
    }
}

impl std::fmt::Display for ActiveDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name().unwrap_or(NO_ACTIVE_DEVICE))
    }
}

/// Owner settings as stored in the `userSettings` field.
///
/// Each field defaults on its own when absent, `null` or unreadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Map<String, Value>")]
pub struct UserSettings {
    /// Lifespan suggested for new components.
    pub default_component_mileage: f64,
    /// Notify about humidity.
    pub receive_humidity_notifications: bool,
    /// Notify about possible theft.
    pub receive_theft_notifications: bool,
    /// Notify when tires should be switched.
    pub receive_tire_switch_notifications: bool,
    /// Names of devices the owner has registered.
    #[serde(rename = "userRegisteredDevices")]
    pub registered_devices: BTreeSet<String>,
    /// The device currently followed.
    #[serde(rename = "userActiveDevice")]
    pub active_device: ActiveDevice,
}

impl From<Map<String, Value>> for UserSettings {
    fn from(doc: Map<String, Value>) -> Self {
        let enabled = |key: &str| lenient::flag(doc.get(key)).unwrap_or(true);
        Self {
            default_component_mileage: lenient::number(doc.get("defaultComponentMileage"))
                .filter(|m| *m > 0.0)
                .unwrap_or(DEFAULT_COMPONENT_MILEAGE),
            receive_humidity_notifications: enabled("receiveHumidityNotifications"),
            receive_theft_notifications: enabled("receiveTheftNotifications"),
            receive_tire_switch_notifications: enabled("receiveTireSwitchNotifications"),
            registered_devices: doc
                .get("userRegisteredDevices")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(|n| lenient::text(Some(n))).collect())
                .unwrap_or_default(),
            active_device: ActiveDevice::from(lenient::text(doc.get("userActiveDevice"))),
        }
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            default_component_mileage: DEFAULT_COMPONENT_MILEAGE,
            receive_humidity_notifications: true,
            receive_theft_notifications: true,
            receive_tire_switch_notifications: true,
            registered_devices: BTreeSet::new(),
            active_device: ActiveDevice::None,
        }
    }
}

impl UserSettings {
    /// Register a device name. Returns `false` if it was already registered.
    pub fn register_device(&mut self, name: impl Into<String>) -> bool {
        self.registered_devices.insert(name.into())
    }
}
