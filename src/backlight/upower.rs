//! Keyboard backlight through UPower's `KbdBacklight` interface on the system
//! bus.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use zbus::{proxy, Connection};

use super::{accepts, BrightnessPolicy, KeyboardBacklight, StoredBrightness};
use crate::error::{Error, Result};

const PLUGIN: &str = "upower";

#[proxy(
    interface = "org.freedesktop.UPower.KbdBacklight",
    default_service = "org.freedesktop.UPower",
    default_path = "/org/freedesktop/UPower/KbdBacklight",
    gen_blocking = false
)]
trait KbdBacklight {
    fn get_brightness(&self) -> zbus::Result<i32>;

    fn get_max_brightness(&self) -> zbus::Result<i32>;

    fn set_brightness(&self, value: i32) -> zbus::Result<()>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UPowerConfig {
    #[serde(flatten)]
    pub policy: BrightnessPolicy,
}

pub struct UPowerBacklight {
    policy: BrightnessPolicy,
    stored: StoredBrightness,
    maximum: AtomicI64,
    proxy: OnceLock<KbdBacklightProxy<'static>>,
}

impl UPowerBacklight {
    pub fn new(config: UPowerConfig) -> Self {
        Self {
            policy: config.policy,
            stored: StoredBrightness::default(),
            maximum: AtomicI64::new(0),
            proxy: OnceLock::new(),
        }
    }

    fn proxy(&self) -> Result<&KbdBacklightProxy<'static>> {
        self.proxy.get().ok_or(Error::NotStarted { plugin: PLUGIN })
    }
}

#[async_trait]
impl KeyboardBacklight for UPowerBacklight {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    async fn start(&self) -> Result<()> {
        let connection = Connection::system().await?;
        let proxy = KbdBacklightProxy::new(&connection).await?;
        let maximum = proxy.get_max_brightness().await?;
        self.maximum.store(i64::from(maximum), Ordering::SeqCst);

        if self.proxy.set(proxy).is_err() {
            debug!("UPower keyboard backlight already started");
        }
        info!("UPower keyboard backlight ready, maximum brightness {}", maximum);
        Ok(())
    }

    async fn get_current(&self) -> Result<i64> {
        let brightness = self.proxy()?.get_brightness().await?;
        Ok(i64::from(brightness))
    }

    async fn set_absolute(&self, value: i64) -> Result<()> {
        let proxy = self.proxy()?;
        let maximum = self.maximum();
        let Some(value) = i32::try_from(value).ok().filter(|v| accepts(i64::from(*v), maximum))
        else {
            debug!("Ignoring brightness {} outside 0..={}", value, maximum);
            return Ok(());
        };
        proxy.set_brightness(value).await?;
        Ok(())
    }

    fn maximum(&self) -> i64 {
        self.maximum.load(Ordering::SeqCst)
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
        let backlight = UPowerBacklight::new(UPowerConfig::default());

        assert!(matches!(
            backlight.set_absolute(1).await,
            Err(Error::NotStarted { plugin: "upower" })
        ));
        assert!(matches!(
            backlight.get_current().await,
            Err(Error::NotStarted { .. })
        ));
    }

    #[test]
    fn config_reads_policy_keys() {
        let config: UPowerConfig = toml::from_str(
            r#"
            keyboard_min_brightness = 1
            lux_for_keyboard_off = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.policy.keyboard_min_brightness, 1);
        assert_eq!(config.policy.lux_for_keyboard_off, 500);
        assert_eq!(config.policy.lux_for_max_brightness, 300);
    }
}
