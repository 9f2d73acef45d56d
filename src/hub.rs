//! Coordination hub: owns the three plugins, starts them together and routes
//! updates between them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::activity::ActivityMonitor;
use crate::backlight::KeyboardBacklight;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::light::{LightSensor, SensorClaim};
use crate::loader;
use crate::plugin::OptionalPlugin;
use crate::types::{
    ActivityUpdate, KeyboardBacklightUpdate, LightSensorUpdate, OperatingMode, Role,
};

/// Updates queued for the hub by its plugins.
pub(crate) enum HubEvent {
    Activity(ActivityUpdate),
    /// Dropped on delivery if the sensor released `claim` in the meantime.
    LightSensor {
        update: LightSensorUpdate,
        claim: SensorClaim,
    },
}

/// A plugin background task waiting to be supervised.
pub(crate) struct SupervisedTask {
    role: Role,
    task: BoxFuture<'static, Result<()>>,
}

/// Receiving ends of a [`HubHandle`].
pub(crate) struct HubQueues {
    pub(crate) events: mpsc::UnboundedReceiver<HubEvent>,
    pub(crate) tasks: mpsc::UnboundedReceiver<SupervisedTask>,
}

type Workers = JoinSet<(Role, Result<()>)>;

/// What plugins get instead of a reference to the hub.
///
/// Updates are queued and applied by the hub's run loop in arrival order.
/// Background tasks travel on their own queue so a slow update never delays
/// their supervision.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
    tasks: mpsc::UnboundedSender<SupervisedTask>,
    stopping: CancellationToken,
}

impl HubHandle {
    pub(crate) fn channel() -> (Self, HubQueues) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (tasks, tasks_rx) = mpsc::unbounded_channel();
        let handle = Self {
            events,
            tasks,
            stopping: CancellationToken::new(),
        };
        let queues = HubQueues {
            events: events_rx,
            tasks: tasks_rx,
        };
        (handle, queues)
    }

    pub fn activity_update(&self, update: ActivityUpdate) {
        self.send(HubEvent::Activity(update));
    }

    /// Queue an ambient reading taken under `claim`.
    pub fn light_sensor_update(&self, update: LightSensorUpdate, claim: &SensorClaim) {
        self.send(HubEvent::LightSensor {
            update,
            claim: claim.clone(),
        });
    }

    /// Run a plugin background task under the hub's supervision.
    ///
    /// An error returned by the task stops the hub and is surfaced from
    /// [`Hub::start`].
    pub fn spawn<F>(&self, role: Role, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task = SupervisedTask {
            role,
            task: task.boxed(),
        };
        if self.tasks.send(task).is_err() {
            debug!("Hub is gone, dropping {} background task", role);
        }
    }

    /// Fires once the hub is stopping. Plugins can observe it, not trigger it.
    pub fn stopping(&self) -> CancellationToken {
        self.stopping.child_token()
    }

    fn send(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("Hub is gone, dropping event");
        }
    }
}

/// The plugin instances a hub is built from.
pub struct Plugins {
    pub activity_monitor: OptionalPlugin<dyn ActivityMonitor>,
    pub keyboard_backlight: Arc<dyn KeyboardBacklight>,
    pub light_sensor: OptionalPlugin<dyn LightSensor>,
}

pub struct Hub {
    handle: HubHandle,
    queues: Mutex<Option<HubQueues>>,
    stopped: AtomicBool,
    activity_monitor: OptionalPlugin<dyn ActivityMonitor>,
    keyboard_backlight: Arc<dyn KeyboardBacklight>,
    /// Held for the whole of either backlight handler.
    backlight_slot: Mutex<()>,
    light_sensor: OptionalPlugin<dyn LightSensor>,
}

impl Hub {
    /// Resolve and construct the three plugins from their config sections.
    pub fn new(config: &Config) -> Result<Self> {
        Self::build(|hub| {
            Ok(Plugins {
                activity_monitor: loader::load_activity_monitor(
                    hub,
                    config.activity_monitor.as_ref(),
                )?,
                keyboard_backlight: loader::load_keyboard_backlight(
                    hub,
                    config.keyboard_backlight.as_ref(),
                )?,
                light_sensor: loader::load_light_sensor(hub, config.light_sensor.as_ref()),
            })
        })
    }

    /// Build a hub from plugins constructed by `plugins`, which receives the
    /// handle the plugins should talk to.
    pub fn build(plugins: impl FnOnce(&HubHandle) -> Result<Plugins>) -> Result<Self> {
        let (handle, queues) = HubHandle::channel();
        let Plugins {
            activity_monitor,
            keyboard_backlight,
            light_sensor,
        } = plugins(&handle)?;

        Ok(Self {
            handle,
            queues: Mutex::new(Some(queues)),
            stopped: AtomicBool::new(false),
            activity_monitor,
            keyboard_backlight,
            backlight_slot: Mutex::new(()),
            light_sensor,
        })
    }

    /// Start all plugins, then route their updates until [`Hub::stop`] is
    /// called or a plugin task fails.
    pub async fn start(&self) -> Result<()> {
        let Some(HubQueues {
            mut events,
            mut tasks,
        }) = self.queues.lock().await.take()
        else {
            return Err(Error::AlreadyStarted);
        };

        self.start_plugins().await?;
        if self.handle.stopping.is_cancelled() {
            return Ok(());
        }
        info!("All plugins started");

        let mut workers = Workers::new();
        let result = loop {
            let event = tokio::select! {
                biased;
                _ = self.handle.stopping.cancelled() => break Ok(()),
                Some(task) = tasks.recv() => {
                    supervise(&mut workers, task);
                    continue;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    match reap(joined) {
                        Some(e) => break Err(e),
                        None => continue,
                    }
                }
                Some(event) = events.recv() => event,
            };
            if let Some(outcome) = self.dispatch(event, &mut workers, &mut tasks).await {
                break outcome;
            }
        };

        workers.shutdown().await;
        self.stop();
        result
    }

    /// Idempotent and non-blocking: signals stopping, then asks every plugin
    /// to stop.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping hub");
        self.handle.stopping.cancel();

        self.activity_monitor.stop();
        self.keyboard_backlight.stop();
        self.light_sensor.stop();
    }

    /// Apply an idle transition. Idleness pauses the light sensor so ambient
    /// readings cannot switch the backlight back on while the user is away.
    pub async fn activity_update(&self, update: ActivityUpdate) -> Result<KeyboardBacklightUpdate> {
        debug!("Got activity update: {:?}", update);
        let kb_update = {
            let _slot = self.backlight_slot.lock().await;
            self.keyboard_backlight
                .on_idle_event(&update)
                .await
                .map_err(|e| e.in_role(Role::KeyboardBacklight))?
        };

        let sensor = if kb_update.mode == OperatingMode::IdleOff {
            self.light_sensor.pause().await
        } else {
            self.light_sensor.resume().await
        };
        sensor.map_err(|e| e.in_role(Role::LightSensor))?;

        Ok(kb_update)
    }

    pub async fn light_sensor_update(
        &self,
        update: LightSensorUpdate,
    ) -> Result<KeyboardBacklightUpdate> {
        debug!("Got light sensor update: {:?}", update);
        let _slot = self.backlight_slot.lock().await;
        self.keyboard_backlight
            .on_lighting_event(&update)
            .await
            .map_err(|e| e.in_role(Role::KeyboardBacklight))
    }

    /// Run every plugin's `start` concurrently. The first failure aborts the
    /// others and stops the hub.
    async fn start_plugins(&self) -> Result<()> {
        info!(
            "Starting plugins (activity monitor {}, light sensor {})",
            enabled(self.activity_monitor.is_enabled()),
            enabled(self.light_sensor.is_enabled())
        );
        let mut startup = JoinSet::new();

        let activity_monitor = self.activity_monitor.clone();
        startup.spawn(async move {
            activity_monitor
                .start()
                .await
                .map_err(|e| e.in_role(Role::ActivityMonitor))
        });
        let keyboard_backlight = Arc::clone(&self.keyboard_backlight);
        startup.spawn(async move {
            keyboard_backlight
                .start()
                .await
                .map_err(|e| e.in_role(Role::KeyboardBacklight))
        });
        let light_sensor = self.light_sensor.clone();
        startup.spawn(async move {
            light_sensor
                .start()
                .await
                .map_err(|e| e.in_role(Role::LightSensor))
        });

        loop {
            let joined = tokio::select! {
                _ = self.handle.stopping.cancelled() => {
                    info!("Stop requested during startup");
                    startup.shutdown().await;
                    return Ok(());
                }
                joined = startup.join_next() => joined,
            };

            let failure = match joined {
                None => return Ok(()),
                Some(Ok(Ok(()))) => continue,
                Some(Ok(Err(e))) => e,
                Some(Err(e)) => Error::from(e),
            };
            error!("Plugin startup failed: {}", failure);
            startup.shutdown().await;
            self.stop();
            return Err(failure);
        }
    }

    /// Apply one queued update while still honoring stop and supervising
    /// background tasks. Returns the hub's final result if either ends it.
    async fn dispatch(
        &self,
        event: HubEvent,
        workers: &mut Workers,
        tasks: &mut mpsc::UnboundedReceiver<SupervisedTask>,
    ) -> Option<Result<()>> {
        let apply = self.apply(event);
        tokio::pin!(apply);

        loop {
            tokio::select! {
                biased;
                _ = self.handle.stopping.cancelled() => return Some(Ok(())),
                Some(task) = tasks.recv() => supervise(workers, task),
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Some(e) = reap(joined) {
                        return Some(Err(e));
                    }
                }
                () = &mut apply => return None,
            }
        }
    }

    async fn apply(&self, event: HubEvent) {
        match event {
            HubEvent::Activity(update) => {
                if let Err(e) = self.activity_update(update).await {
                    error!("Failed to apply activity update: {}", e);
                }
            }
            HubEvent::LightSensor { update, claim } => {
                if !claim.is_held() {
                    debug!("Dropping light reading taken before the sensor paused: {:?}", update);
                    return;
                }
                if let Err(e) = self.light_sensor_update(update).await {
                    error!("Failed to apply light sensor update: {}", e);
                }
            }
        }
    }
}

fn enabled(is_enabled: bool) -> &'static str {
    if is_enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn supervise(workers: &mut Workers, SupervisedTask { role, task }: SupervisedTask) {
    debug!("Supervising {} background task", role);
    workers.spawn(async move { (role, task.await) });
}

/// The error that ends the hub, if the finished task produced one.
fn reap(joined: std::result::Result<(Role, Result<()>), JoinError>) -> Option<Error> {
    match joined {
        Ok((role, Ok(()))) => {
            debug!("{} background task finished", role);
            None
        }
        Ok((role, Err(e))) => {
            error!("{} background task failed: {}", role, e);
            Some(e.in_role(role))
        }
        Err(e) if e.is_cancelled() => None,
        Err(e) => Some(e.into()),
    }
}
