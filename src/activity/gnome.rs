//! Idle detection through Mutter's `org.gnome.Mutter.IdleMonitor` on the
//! session bus.
//!
//! An idle watch fires once `idle_delay` passes without input. Each time it
//! does, a one-shot user-active watch is added to learn when input resumes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use zbus::{proxy, Connection};

use super::{ActivityMonitor, IdleReporter};
use crate::error::{Error, Result};
use crate::hub::HubHandle;
use crate::types::Role;

const PLUGIN: &str = "gnome_dbus";

#[proxy(
    interface = "org.gnome.Mutter.IdleMonitor",
    default_service = "org.gnome.Mutter.IdleMonitor",
    default_path = "/org/gnome/Mutter/IdleMonitor/Core",
    gen_blocking = false
)]
trait MutterIdleMonitor {
    fn add_idle_watch(&self, interval: u64) -> zbus::Result<u32>;

    fn add_user_active_watch(&self) -> zbus::Result<u32>;

    fn remove_watch(&self, id: u32) -> zbus::Result<()>;

    #[zbus(signal)]
    fn watch_fired(&self, id: u32) -> zbus::Result<()>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GnomeIdleConfig {
    /// Seconds without input before the user counts as idle.
    pub idle_delay: u64,
}

/// What a fired watch means for the idle state.
#[derive(Debug, PartialEq, Eq)]
enum WatchEvent {
    /// The idle watch fired. `superseded` is an active watch still pending
    /// from an earlier idle period.
    Idle { superseded: Option<u32> },
    Active,
    /// Not one of ours, or an active watch already replaced.
    Unrelated,
}

/// Watch ids owned by one monitor.
#[derive(Debug)]
struct Watches {
    idle: u32,
    active: Option<u32>,
}

impl Watches {
    fn new(idle: u32) -> Self {
        Self { idle, active: None }
    }

    fn fired(&mut self, id: u32) -> WatchEvent {
        if id == self.idle {
            WatchEvent::Idle {
                superseded: self.active.take(),
            }
        } else if self.active == Some(id) {
            self.active = None;
            WatchEvent::Active
        } else {
            WatchEvent::Unrelated
        }
    }

    fn arm(&mut self, active: u32) {
        self.active = Some(active);
    }
}

pub struct GnomeIdleMonitor {
    config: GnomeIdleConfig,
    hub: HubHandle,
    reporter: Arc<IdleReporter>,
}

impl GnomeIdleMonitor {
    pub fn new(hub: HubHandle, config: GnomeIdleConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(IdleReporter::new(hub.clone())),
            hub,
        }
    }
}

#[async_trait]
impl ActivityMonitor for GnomeIdleMonitor {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    async fn start(&self) -> Result<()> {
        let stopping = self.hub.stopping();
        if stopping.is_cancelled() {
            return Ok(());
        }

        let connection = Connection::session().await?;
        let proxy = MutterIdleMonitorProxy::new(&connection).await?;
        // Subscribe first so a watch firing right away is not missed.
        let mut fired = proxy.receive_watch_fired().await?;
        let interval_ms = self.config.idle_delay.saturating_mul(1000);
        let idle = proxy.add_idle_watch(interval_ms).await?;
        info!(
            "Mutter idle watch {} added with threshold {}s",
            idle, self.config.idle_delay
        );

        let reporter = Arc::clone(&self.reporter);
        self.hub.spawn(Role::ActivityMonitor, async move {
            let mut watches = Watches::new(idle);
            loop {
                let signal = tokio::select! {
                    biased;
                    _ = stopping.cancelled() => return Ok(()),
                    signal = fired.next() => signal,
                };
                let Some(signal) = signal else {
                    return Err(Error::FeedClosed { plugin: PLUGIN });
                };
                let id = *signal.args()?.id();
                debug!("Mutter watch {} fired", id);

                match watches.fired(id) {
                    WatchEvent::Idle { superseded } => {
                        if let Some(stale) = superseded {
                            if let Err(e) = proxy.remove_watch(stale).await {
                                warn!("Failed to remove stale active watch {}: {}", stale, e);
                            }
                        }
                        watches.arm(proxy.add_user_active_watch().await?);
                        reporter.trigger_idle();
                    }
                    WatchEvent::Active => reporter.end_idle(),
                    WatchEvent::Unrelated => debug!("Ignoring watch {}", id),
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        // Mutter drops the watches of clients that leave the bus.
        debug!("Mutter idle monitor stopping");
    }

    fn verify(&self) -> Result<()> {
        if self.config.idle_delay == 0 {
            return Err(Error::config(Role::ActivityMonitor, "idle_delay must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_then_active_watch_pairs_up() {
        let mut watches = Watches::new(1);

        assert_eq!(watches.fired(1), WatchEvent::Idle { superseded: None });
        watches.arm(7);
        assert_eq!(watches.fired(7), WatchEvent::Active);
        // One-shot: firing again means nothing.
        assert_eq!(watches.fired(7), WatchEvent::Unrelated);
    }

    #[test]
    fn new_idle_period_supersedes_pending_active_watch() {
        let mut watches = Watches::new(1);
        watches.fired(1);
        watches.arm(7);

        assert_eq!(watches.fired(1), WatchEvent::Idle { superseded: Some(7) });
        watches.arm(8);

        assert_eq!(watches.fired(7), WatchEvent::Unrelated);
        assert_eq!(watches.fired(8), WatchEvent::Active);
    }

    #[test]
    fn foreign_watches_are_ignored() {
        let mut watches = Watches::new(1);

        assert_eq!(watches.fired(42), WatchEvent::Unrelated);
    }

    #[test]
    fn zero_idle_delay_fails_verification() {
        let (hub, _queues) = HubHandle::channel();
        let config: GnomeIdleConfig = toml::from_str("idle_delay = 0").unwrap();
        let monitor = GnomeIdleMonitor::new(hub, config);

        assert!(matches!(
            monitor.verify(),
            Err(Error::Config {
                section: "activity_monitor",
                ..
            })
        ));
    }
}
