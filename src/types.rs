//! Messages exchanged between the hub and its plugins.

use std::fmt;

/// The three plugin slots owned by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    ActivityMonitor,
    KeyboardBacklight,
    LightSensor,
}

impl Role {
    /// Name of the configuration section that selects this role's backend.
    pub fn section(self) -> &'static str {
        match self {
            Role::ActivityMonitor => "activity_monitor",
            Role::KeyboardBacklight => "keyboard_backlight",
            Role::LightSensor => "light_sensor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// Sent by the activity monitor on every idle/active transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityUpdate {
    pub is_idle: bool,
}

/// Sent by the light sensor on every ambient light change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightSensorUpdate {
    /// Informational only, e.g. "lux" or "vendor".
    pub unit: String,
    pub value: i64,
}

/// Why the keyboard backlight currently has the brightness it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// User present, brightness follows ambient light.
    ActiveOn,
    /// User present, but the room is bright enough to switch the backlight off.
    ActiveOff,
    /// User idle, backlight forced off.
    IdleOff,
}

/// Returned by the keyboard backlight after handling either update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardBacklightUpdate {
    pub mode: OperatingMode,
}

impl KeyboardBacklightUpdate {
    pub fn new(mode: OperatingMode) -> Self {
        Self { mode }
    }
}
