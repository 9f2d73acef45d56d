//! Keyboard backlight contract and the idle/ambient-light behavior shared by
//! every backend.

mod gnome;
mod policy;
mod upower;
mod xbacklight;

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{ActivityUpdate, KeyboardBacklightUpdate, LightSensorUpdate, OperatingMode, Role};

pub use policy::{
    BrightnessPolicy, DEFAULT_KEYBOARD_MIN_BRIGHTNESS, DEFAULT_LUX_FOR_KEYBOARD_OFF,
    DEFAULT_LUX_FOR_MAX_BRIGHTNESS, DEFAULT_LUX_FOR_MIN_BRIGHTNESS,
};
pub use gnome::GnomeBacklight;
pub use upower::UPowerBacklight;
pub use xbacklight::XBacklight;

/// Brightness restored on activity when no idle transition has captured one.
pub const SEED_BRIGHTNESS: i64 = 1;

/// Brightness captured right before the backlight is forced off for
/// idleness.
#[derive(Debug)]
pub struct StoredBrightness(AtomicI64);

impl Default for StoredBrightness {
    fn default() -> Self {
        Self(AtomicI64::new(SEED_BRIGHTNESS))
    }
}

impl StoredBrightness {
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    fn capture(&self, value: i64) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// Whether `value` may be sent to a device whose ceiling is `maximum`.
pub fn accepts(value: i64, maximum: i64) -> bool {
    (0..=maximum).contains(&value)
}

#[async_trait]
pub trait KeyboardBacklight: Send + Sync {
    fn name(&self) -> &'static str;

    /// Connect to the device and discover its maximum.
    async fn start(&self) -> Result<()>;

    async fn get_current(&self) -> Result<i64>;

    /// Drive the device. Values outside `0..=maximum()` are dropped without
    /// touching the device; calls before `start()` fail with
    /// [`Error::NotStarted`].
    async fn set_absolute(&self, value: i64) -> Result<()>;

    fn maximum(&self) -> i64;

    fn policy(&self) -> &BrightnessPolicy;

    fn stored(&self) -> &StoredBrightness;

    /// Best effort, must not block.
    fn stop(&self) {}

    fn verify(&self) -> Result<()> {
        self.policy()
            .verify()
            .map_err(|reason| Error::config(Role::KeyboardBacklight, reason))
    }

    async fn capture_current(&self) -> Result<i64> {
        capture_current(self).await
    }

    async fn on_idle_event(&self, update: &ActivityUpdate) -> Result<KeyboardBacklightUpdate> {
        apply_idle_event(self, update).await
    }

    async fn on_lighting_event(
        &self,
        update: &LightSensorUpdate,
    ) -> Result<KeyboardBacklightUpdate> {
        apply_lighting_event(self, update).await
    }
}

/// Remember the live brightness so it can be restored after idle.
///
/// A dark device is not captured: a second idle report, or idling while the
/// ambient light already switched the backlight off, keeps the earlier value.
pub async fn capture_current<B>(backlight: &B) -> Result<i64>
where
    B: KeyboardBacklight + ?Sized,
{
    let current = backlight.get_current().await?;
    if current > 0 {
        backlight.stored().capture(current);
        debug!("Stored brightness: {}", current);
    }
    Ok(backlight.stored().get())
}

pub async fn apply_idle_event<B>(
    backlight: &B,
    update: &ActivityUpdate,
) -> Result<KeyboardBacklightUpdate>
where
    B: KeyboardBacklight + ?Sized,
{
    if update.is_idle {
        backlight.capture_current().await?;
        backlight.set_absolute(0).await?;
        return Ok(KeyboardBacklightUpdate::new(OperatingMode::IdleOff));
    }

    if backlight.get_current().await? == 0 {
        let stored = backlight.stored().get();
        debug!("Restoring keyboard brightness to {}", stored);
        backlight.set_absolute(stored).await?;
    }
    Ok(KeyboardBacklightUpdate::new(OperatingMode::ActiveOn))
}

pub async fn apply_lighting_event<B>(
    backlight: &B,
    update: &LightSensorUpdate,
) -> Result<KeyboardBacklightUpdate>
where
    B: KeyboardBacklight + ?Sized,
{
    let (target, mode) = backlight.policy().target(update.value, backlight.maximum());
    debug!("Target keyboard brightness: {} ({:?})", target, mode);
    backlight.set_absolute(target).await?;
    Ok(KeyboardBacklightUpdate::new(mode))
}
