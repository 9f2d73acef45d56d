//! Ambient light from iio-sensor-proxy (`net.hadess.SensorProxy`) on the
//! system bus.

use std::sync::OnceLock;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};
use zbus::{proxy, Connection};

use super::{LightSensor, SensorClaim};
use crate::error::{Error, Result};
use crate::hub::HubHandle;
use crate::types::{LightSensorUpdate, Role};

const PLUGIN: &str = "sensorproxy";

#[proxy(
    interface = "net.hadess.SensorProxy",
    default_service = "net.hadess.SensorProxy",
    default_path = "/net/hadess/SensorProxy",
    gen_blocking = false
)]
trait AmbientLight {
    fn claim_light(&self) -> zbus::Result<()>;

    fn release_light(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn has_ambient_light(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn light_level(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn light_level_unit(&self) -> zbus::Result<String>;
}

pub struct SensorProxyLightSensor {
    hub: HubHandle,
    proxy: OnceLock<AmbientLightProxy<'static>>,
    /// Read once at start; the proxy does not change units while running.
    unit: OnceLock<String>,
    claim: SensorClaim,
}

impl SensorProxyLightSensor {
    pub fn new(hub: HubHandle) -> Self {
        Self {
            hub,
            proxy: OnceLock::new(),
            unit: OnceLock::new(),
            claim: SensorClaim::default(),
        }
    }

    fn proxy(&self) -> Result<&AmbientLightProxy<'static>> {
        self.proxy.get().ok_or(Error::NotStarted { plugin: PLUGIN })
    }
}

fn reading(unit: &str, level: f64) -> LightSensorUpdate {
    LightSensorUpdate {
        unit: unit.to_string(),
        value: level as i64,
    }
}

/// Hand a level to the hub unless the claim was released meanwhile.
fn forward(claim: &SensorClaim, hub: &HubHandle, unit: &str, level: f64) -> bool {
    let sent = claim.send(hub, reading(unit, level));
    if !sent {
        debug!("Sensor released, dropping light level {}", level);
    }
    sent
}

#[async_trait]
impl LightSensor for SensorProxyLightSensor {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    async fn start(&self) -> Result<()> {
        let connection = Connection::system().await?;
        let proxy = AmbientLightProxy::new(&connection).await?;
        if !proxy.has_ambient_light().await? {
            warn!("iio-sensor-proxy reports no ambient light sensor");
        }

        let unit = proxy.light_level_unit().await?;
        let unit = self.unit.get_or_init(|| unit).clone();

        let mut changes = proxy.receive_light_level_changed().await;
        let hub = self.hub.clone();
        let claim = self.claim.clone();
        let stopping = self.hub.stopping();
        self.hub.spawn(Role::LightSensor, async move {
            loop {
                let change = tokio::select! {
                    _ = stopping.cancelled() => return Ok(()),
                    change = changes.next() => change,
                };
                let Some(change) = change else {
                    return Err(Error::FeedClosed { plugin: PLUGIN });
                };
                if !claim.is_held() {
                    continue;
                }
                let level = change.get().await?;
                debug!("Light level changed: {} {}", level, unit);
                forward(&claim, &hub, &unit, level);
            }
        });

        if self.proxy.set(proxy).is_err() {
            debug!("iio-sensor-proxy light sensor already started");
        }
        info!("iio-sensor-proxy light sensor ready");
        self.resume().await
    }

    async fn pause(&self) -> Result<()> {
        let proxy = self.proxy()?;
        if self.claim.release() {
            proxy.release_light().await?;
            debug!("Released ambient light sensor");
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let proxy = self.proxy()?;
        if !self.claim.is_held() {
            proxy.claim_light().await?;
            self.claim.hold();
            debug!("Claimed ambient light sensor");
        }

        let level = proxy.light_level().await?;
        let unit = self.unit.get().map_or("lux", String::as_str);
        forward(&self.claim, &self.hub, unit, level);
        Ok(())
    }

    fn stop(&self) {
        // iio-sensor-proxy drops the claims of peers that leave the bus.
        self.claim.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubEvent;

    #[tokio::test]
    async fn pause_and_resume_before_start_fail_fast() {
        let (hub, _queues) = HubHandle::channel();
        let sensor = SensorProxyLightSensor::new(hub);

        assert!(matches!(
            sensor.pause().await,
            Err(Error::NotStarted { plugin: "sensorproxy" })
        ));
        assert!(matches!(
            sensor.resume().await,
            Err(Error::NotStarted { .. })
        ));
    }

    #[test]
    fn reading_truncates_level() {
        assert_eq!(
            reading("lux", 154.9),
            LightSensorUpdate {
                unit: "lux".to_string(),
                value: 154,
            }
        );
    }

    #[test]
    fn level_after_pause_never_reaches_hub() {
        let (hub, mut queues) = HubHandle::channel();
        let sensor = SensorProxyLightSensor::new(hub);
        sensor.claim.hold();
        assert!(forward(&sensor.claim, &sensor.hub, "lux", 80.0));

        // What pause() does before talking to the proxy.
        assert!(sensor.claim.release());
        assert!(!forward(&sensor.claim, &sensor.hub, "lux", 155.0));

        match queues.events.try_recv() {
            Ok(HubEvent::LightSensor { update, claim }) => {
                assert_eq!(update.value, 80);
                assert!(!claim.is_held());
            }
            _ => panic!("expected the reading taken while claimed"),
        }
        assert!(queues.events.try_recv().is_err());
    }

    #[test]
    fn stop_releases_the_claim() {
        let (hub, _queues) = HubHandle::channel();
        let sensor = SensorProxyLightSensor::new(hub);
        sensor.claim.hold();

        sensor.stop();

        assert!(!sensor.claim.is_held());
    }
}
