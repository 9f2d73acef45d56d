//! Ambient light sensing.

mod sensorproxy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::hub::HubHandle;
use crate::plugin::OptionalPlugin;
use crate::types::LightSensorUpdate;

pub use sensorproxy::SensorProxyLightSensor;

/// Whether a sensor currently holds its claim.
///
/// Readings travel to the hub together with the claim they were taken under,
/// and the hub drops any that arrive after the claim was released.
#[derive(Debug, Clone, Default)]
pub struct SensorClaim(Arc<AtomicBool>);

impl SensorClaim {
    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn hold(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether the claim was held.
    pub fn release(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    /// Queue `update` for the hub if the claim is held. Returns whether it
    /// was queued.
    pub fn send(&self, hub: &HubHandle, update: LightSensorUpdate) -> bool {
        if !self.is_held() {
            return false;
        }
        hub.light_sensor_update(update, self);
        true
    }
}

#[async_trait]
pub trait LightSensor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Subscribe to the ambient light feed, claim the sensor and push an
    /// initial reading to the hub.
    async fn start(&self) -> Result<()>;

    /// Release the sensor claim. The feed subscription stays in place.
    async fn pause(&self) -> Result<()>;

    /// Re-claim the sensor and push a fresh reading.
    async fn resume(&self) -> Result<()>;

    /// Best effort, must not block.
    fn stop(&self) {}

    fn verify(&self) -> Result<()> {
        Ok(())
    }
}

impl OptionalPlugin<dyn LightSensor> {
    pub async fn start(&self) -> Result<()> {
        match self {
            OptionalPlugin::Enabled(sensor) => sensor.start().await,
            OptionalPlugin::Disabled { reason } => {
                debug!("Light sensor disabled ({}), brightness follows idle state only", reason);
                Ok(())
            }
        }
    }

    pub async fn pause(&self) -> Result<()> {
        match self.get() {
            Some(sensor) => sensor.pause().await,
            None => Ok(()),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        match self.get() {
            Some(sensor) => sensor.resume().await,
            None => Ok(()),
        }
    }

    pub fn stop(&self) {
        if let Some(sensor) = self.get() {
            sensor.stop();
        }
    }
}
