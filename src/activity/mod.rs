//! User activity monitoring.

mod gnome;
mod xscreensaver;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::hub::HubHandle;
use crate::plugin::OptionalPlugin;
use crate::types::ActivityUpdate;

pub use gnome::GnomeIdleMonitor;
pub use xscreensaver::XScreenSaverMonitor;

#[async_trait]
pub trait ActivityMonitor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Begin watching for user input. Transitions are reported through an
    /// [`IdleReporter`].
    async fn start(&self) -> Result<()>;

    /// Best effort, must not block.
    fn stop(&self) {}

    fn verify(&self) -> Result<()> {
        Ok(())
    }
}

/// Idle flag plus the hub notification shared by all activity monitors.
///
/// Only real transitions reach the hub: triggering idle while already idle,
/// or ending idle while active, is ignored.
pub struct IdleReporter {
    hub: HubHandle,
    is_idle: AtomicBool,
}

impl IdleReporter {
    pub fn new(hub: HubHandle) -> Self {
        Self {
            hub,
            is_idle: AtomicBool::new(false),
        }
    }

    pub fn trigger_idle(&self) {
        if self.is_idle.swap(true, Ordering::SeqCst) {
            debug!("Already idle");
            return;
        }
        info!("User is idle");
        self.hub.activity_update(ActivityUpdate { is_idle: true });
    }

    pub fn end_idle(&self) {
        if !self.is_idle.swap(false, Ordering::SeqCst) {
            debug!("Already active");
            return;
        }
        info!("User is active");
        self.hub.activity_update(ActivityUpdate { is_idle: false });
    }
}

impl OptionalPlugin<dyn ActivityMonitor> {
    pub async fn start(&self) -> Result<()> {
        match self {
            OptionalPlugin::Enabled(monitor) => monitor.start().await,
            OptionalPlugin::Disabled { reason } => {
                info!("Activity monitor disabled ({}), backlight never idles", reason);
                Ok(())
            }
        }
    }

    pub fn stop(&self) {
        if let Some(monitor) = self.get() {
            monitor.stop();
        }
    }
}
