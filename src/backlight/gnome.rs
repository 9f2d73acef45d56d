//! Keyboard backlight through gnome-settings-daemon's power plugin on the
//! session bus.

use std::sync::OnceLock;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use zbus::{proxy, Connection};

use super::{accepts, BrightnessPolicy, KeyboardBacklight, StoredBrightness};
use crate::error::{Error, Result};

const PLUGIN: &str = "dbus_gnome";

/// gnome-settings-daemon reports brightness as a percentage.
const MAXIMUM: i64 = 100;

#[proxy(
    interface = "org.gnome.SettingsDaemon.Power.Keyboard",
    default_service = "org.gnome.SettingsDaemon.Power",
    default_path = "/org/gnome/SettingsDaemon/Power",
    gen_blocking = false
)]
trait GnomeKeyboard {
    #[zbus(property)]
    fn brightness(&self) -> zbus::Result<i32>;

    #[zbus(property)]
    fn set_brightness(&self, value: i32) -> zbus::Result<()>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GnomeConfig {
    #[serde(flatten)]
    pub policy: BrightnessPolicy,
}

pub struct GnomeBacklight {
    policy: BrightnessPolicy,
    stored: StoredBrightness,
    proxy: OnceLock<GnomeKeyboardProxy<'static>>,
}

impl GnomeBacklight {
    pub fn new(config: GnomeConfig) -> Self {
        Self {
            policy: config.policy,
            stored: StoredBrightness::default(),
            proxy: OnceLock::new(),
        }
    }

    fn proxy(&self) -> Result<&GnomeKeyboardProxy<'static>> {
        self.proxy.get().ok_or(Error::NotStarted { plugin: PLUGIN })
    }
}

#[async_trait]
impl KeyboardBacklight for GnomeBacklight {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    async fn start(&self) -> Result<()> {
        let connection = Connection::session().await?;
        let proxy = GnomeKeyboardProxy::new(&connection).await?;
        let current = proxy.brightness().await?;

        if self.proxy.set(proxy).is_err() {
            debug!("GNOME keyboard backlight already started");
        }
        info!("GNOME keyboard backlight ready, brightness {}%", current);
        Ok(())
    }

    async fn get_current(&self) -> Result<i64> {
        let brightness = self.proxy()?.brightness().await?;
        Ok(i64::from(brightness))
    }

    async fn set_absolute(&self, value: i64) -> Result<()> {
        let proxy = self.proxy()?;
        let Some(value) = i32::try_from(value).ok().filter(|v| accepts(i64::from(*v), MAXIMUM))
        else {
            debug!("Ignoring brightness {} outside 0..={}", value, MAXIMUM);
            return Ok(());
        };
        proxy.set_brightness(value).await?;
        Ok(())
    }

    fn maximum(&self) -> i64 {
        MAXIMUM
    }

    fn policy(&self) -> &BrightnessPolicy {
        &self.policy
    }

    fn stored(&self) -> &StoredBrightness {
        &self.stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn device_calls_before_start_fail_fast() {
        let backlight = GnomeBacklight::new(GnomeConfig::default());

        assert!(matches!(
            backlight.get_current().await,
            Err(Error::NotStarted { plugin: "dbus_gnome" })
        ));
        assert!(matches!(
            backlight.set_absolute(50).await,
            Err(Error::NotStarted { .. })
        ));
    }

    #[test]
    fn full_ramp_reaches_one_hundred_percent() {
        let backlight: GnomeBacklight = GnomeBacklight::new(
            toml::from_str("lux_for_max_brightness = 200").unwrap(),
        );

        assert_eq!(backlight.maximum(), 100);
        assert_eq!(
            backlight.policy().target(250, backlight.maximum()),
            (100, crate::types::OperatingMode::ActiveOn)
        );
    }
}
