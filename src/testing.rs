//! In-memory plugins for exercising the hub without a desktop session.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::activity::{ActivityMonitor, IdleReporter};
use crate::backlight::{
    accepts, apply_idle_event, apply_lighting_event, BrightnessPolicy, KeyboardBacklight,
    StoredBrightness,
};
use crate::error::{Error, Result};
use crate::hub::HubHandle;
use crate::light::{LightSensor, SensorClaim};
use crate::types::{ActivityUpdate, KeyboardBacklightUpdate, LightSensorUpdate, Role};

const FAKE: &str = "fake";

pub struct FakeBacklight {
    maximum: i64,
    level: AtomicI64,
    started: AtomicBool,
    fail_start: bool,
    yielding: bool,
    hanging: bool,
    policy: BrightnessPolicy,
    stored: StoredBrightness,
    writes: Mutex<Vec<i64>>,
    stops: AtomicUsize,
    lighting_events: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeBacklight {
    pub fn new(maximum: i64, level: i64) -> Self {
        Self {
            maximum,
            level: AtomicI64::new(level),
            started: AtomicBool::new(false),
            fail_start: false,
            yielding: false,
            hanging: false,
            policy: BrightnessPolicy::default(),
            stored: StoredBrightness::default(),
            writes: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            lighting_events: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Yield to the scheduler inside every device call.
    pub fn yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    /// Never answer a device call.
    pub fn hanging(mut self) -> Self {
        self.hanging = true;
        self
    }

    pub fn force_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn level(&self) -> i64 {
        self.level.load(Ordering::SeqCst)
    }

    /// Values that reached the device.
    pub fn writes(&self) -> Vec<i64> {
        self.writes.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn lighting_events(&self) -> usize {
        self.lighting_events.load(Ordering::SeqCst)
    }

    /// Most handler calls ever observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn device_call(&self) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::NotStarted { plugin: FAKE });
        }
        if self.hanging {
            std::future::pending::<()>().await;
        }
        if self.yielding {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyboardBacklight for FakeBacklight {
    fn name(&self) -> &'static str {
        FAKE
    }

    async fn start(&self) -> Result<()> {
        if self.fail_start {
            return Err(Error::Command {
                command: FAKE,
                detail: "device missing".to_string(),
            });
        }
        self.force_started();
        Ok(())
    }

    async fn get_current(&self) -> Result<i64> {
        self.device_call().await?;
        Ok(self.level())
    }

    async fn set_absolute(&self, value: i64) -> Result<()> {
        self.device_call().await?;
        if accepts(value, self.maximum) {
            self.level.store(value, Ordering::SeqCst);
            self.writes.lock().unwrap().push(value);
        }
        Ok(())
    }

    fn maximum(&self) -> i64 {
        self.maximum
    }

    fn policy(&self) -> &BrightnessPolicy {
        &self.policy
    }

    fn stored(&self) -> &StoredBrightness {
        &self.stored
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_idle_event(&self, update: &ActivityUpdate) -> Result<KeyboardBacklightUpdate> {
        self.enter();
        let result = apply_idle_event(self, update).await;
        self.leave();
        result
    }

    async fn on_lighting_event(
        &self,
        update: &LightSensorUpdate,
    ) -> Result<KeyboardBacklightUpdate> {
        self.lighting_events.fetch_add(1, Ordering::SeqCst);
        self.enter();
        let result = apply_lighting_event(self, update).await;
        self.leave();
        result
    }
}

pub struct FakeLightSensor {
    hub: HubHandle,
    claim: SensorClaim,
    reading: Mutex<Option<i64>>,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeLightSensor {
    pub fn new(hub: HubHandle) -> Self {
        Self {
            hub,
            claim: SensorClaim::default(),
            reading: Mutex::new(None),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Push `lux` to the hub on start and on every resume.
    pub fn reporting(self, lux: i64) -> Self {
        self.set_reading(lux);
        self
    }

    pub fn set_reading(&self, lux: i64) {
        *self.reading.lock().unwrap() = Some(lux);
    }

    /// Report `lux` as a live change, as the device feed would.
    pub fn emit(&self, lux: i64) -> bool {
        self.claim.send(&self.hub, lux_update(lux))
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_held()
    }

    fn push_reading(&self) {
        let reading = *self.reading.lock().unwrap();
        if let Some(lux) = reading {
            self.claim.send(&self.hub, lux_update(lux));
        }
    }
}

fn lux_update(value: i64) -> LightSensorUpdate {
    LightSensorUpdate {
        unit: "lux".to_string(),
        value,
    }
}

#[async_trait]
impl LightSensor for FakeLightSensor {
    fn name(&self) -> &'static str {
        FAKE
    }

    async fn start(&self) -> Result<()> {
        self.claim.hold();
        self.push_reading();
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.claim.release();
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.claim.hold();
        self.push_reading();
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.claim.release();
    }
}

/// What [`FakeActivityMonitor::start`] does.
#[derive(Debug, Clone, Copy)]
pub enum StartBehavior {
    Succeed,
    /// Report the user idle from inside `start`.
    ReportIdle,
    /// Start a background task that fails right away.
    FailInBackground,
    /// Never finish starting.
    Hang,
}

pub struct FakeActivityMonitor {
    hub: HubHandle,
    reporter: IdleReporter,
    behavior: StartBehavior,
    pub stops: AtomicUsize,
}

impl FakeActivityMonitor {
    pub fn new(hub: HubHandle, behavior: StartBehavior) -> Self {
        Self {
            reporter: IdleReporter::new(hub.clone()),
            hub,
            behavior,
            stops: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ActivityMonitor for FakeActivityMonitor {
    fn name(&self) -> &'static str {
        FAKE
    }

    async fn start(&self) -> Result<()> {
        match self.behavior {
            StartBehavior::Succeed => Ok(()),
            StartBehavior::ReportIdle => {
                self.reporter.trigger_idle();
                Ok(())
            }
            StartBehavior::FailInBackground => {
                self.hub.spawn(Role::ActivityMonitor, async {
                    Err(Error::FeedClosed { plugin: FAKE })
                });
                Ok(())
            }
            StartBehavior::Hang => std::future::pending().await,
        }
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
