//! Ambient light to keyboard brightness mapping.

use serde::Deserialize;

use crate::types::OperatingMode;

pub const DEFAULT_KEYBOARD_MIN_BRIGHTNESS: i64 = 10;
pub const DEFAULT_LUX_FOR_KEYBOARD_OFF: i64 = 400;
pub const DEFAULT_LUX_FOR_MAX_BRIGHTNESS: i64 = 300;
pub const DEFAULT_LUX_FOR_MIN_BRIGHTNESS: i64 = 10;

/// Thresholds of the piecewise-linear lux to brightness curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrightnessPolicy {
    /// Brightness used at or below `lux_for_min_brightness`.
    pub keyboard_min_brightness: i64,
    /// At or above this reading the backlight is switched off.
    pub lux_for_keyboard_off: i64,
    pub lux_for_max_brightness: i64,
    pub lux_for_min_brightness: i64,
}

impl Default for BrightnessPolicy {
    fn default() -> Self {
        Self {
            keyboard_min_brightness: DEFAULT_KEYBOARD_MIN_BRIGHTNESS,
            lux_for_keyboard_off: DEFAULT_LUX_FOR_KEYBOARD_OFF,
            lux_for_max_brightness: DEFAULT_LUX_FOR_MAX_BRIGHTNESS,
            lux_for_min_brightness: DEFAULT_LUX_FOR_MIN_BRIGHTNESS,
        }
    }
}

impl BrightnessPolicy {
    /// Target brightness for an ambient reading on a device whose ceiling is
    /// `maximum`.
    pub fn target(&self, lux: i64, maximum: i64) -> (i64, OperatingMode) {
        if lux >= self.lux_for_keyboard_off {
            return (0, OperatingMode::ActiveOff);
        }

        let target = if lux <= self.lux_for_min_brightness {
            self.keyboard_min_brightness
        } else if lux >= self.lux_for_max_brightness {
            maximum
        } else {
            let fraction = (lux - self.lux_for_min_brightness) as f64
                / (self.lux_for_max_brightness - self.lux_for_min_brightness) as f64;
            let span = (maximum - self.keyboard_min_brightness) as f64;
            (self.keyboard_min_brightness as f64 + fraction * span) as i64
        };

        (target, OperatingMode::ActiveOn)
    }

    /// Check that the interpolation range is well defined.
    pub fn verify(&self) -> Result<(), String> {
        if self.lux_for_min_brightness >= self.lux_for_max_brightness {
            return Err(format!(
                "lux_for_min_brightness ({}) must be below lux_for_max_brightness ({})",
                self.lux_for_min_brightness, self.lux_for_max_brightness
            ));
        }
        if self.keyboard_min_brightness < 0 {
            return Err(format!(
                "keyboard_min_brightness ({}) must not be negative",
                self.keyboard_min_brightness
            ));
        }
        Ok(())
    }
}
