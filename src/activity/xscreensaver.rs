//! Idle detection using the X11 XScreenSaver extension.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::screensaver::ConnectionExt as ScreensaverConnectionExt;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::{ActivityMonitor, IdleReporter};
use crate::error::{Error, Result};
use crate::hub::HubHandle;
use crate::types::Role;

const PLUGIN: &str = "xscreensaver";

/// Consecutive failed queries after which the X server is considered gone.
const MAX_QUERY_FAILURES: u32 = 5;

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct XScreenSaverConfig {
    /// Seconds without input before the user counts as idle.
    pub idle_delay: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

pub struct XScreenSaverMonitor {
    config: XScreenSaverConfig,
    hub: HubHandle,
    reporter: Arc<IdleReporter>,
    running: Arc<AtomicBool>,
    stopping: CancellationToken,
}

impl XScreenSaverMonitor {
    pub fn new(hub: HubHandle, config: XScreenSaverConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(IdleReporter::new(hub.clone())),
            stopping: hub.stopping(),
            hub,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl ActivityMonitor for XScreenSaverMonitor {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    async fn start(&self) -> Result<()> {
        if self.stopping.is_cancelled() {
            debug!("Hub is stopping, not starting idle monitor");
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (conn, root) = tokio::task::spawn_blocking(connect_screensaver)
            .await?
            .inspect_err(|_| self.running.store(false, Ordering::SeqCst))?;
        // stop() may have run while the display was connecting.
        if self.stopping.is_cancelled() {
            self.running.store(false, Ordering::SeqCst);
            return Ok(());
        }

        let idle_delay = Duration::from_secs(self.config.idle_delay);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        info!(
            "Starting idle monitor with threshold {:?}, polling every {:?}",
            idle_delay, poll_interval
        );

        let (samples_tx, mut samples) = mpsc::unbounded_channel();
        let running = Arc::clone(&self.running);
        let thread_stopping = self.stopping.clone();
        thread::Builder::new()
            .name("idle-monitor".to_string())
            .spawn(move || {
                run_idle_monitor(
                    conn,
                    root,
                    IdlePolling {
                        idle_delay,
                        poll_interval,
                        running,
                        stopping: thread_stopping,
                    },
                    samples_tx,
                );
            })?;

        let reporter = Arc::clone(&self.reporter);
        let stopping = self.hub.stopping();
        self.hub.spawn(Role::ActivityMonitor, async move {
            loop {
                let sample = tokio::select! {
                    biased;
                    _ = stopping.cancelled() => return Ok(()),
                    sample = samples.recv() => sample,
                };
                match sample {
                    Some(Ok(true)) => reporter.trigger_idle(),
                    Some(Ok(false)) => reporter.end_idle(),
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::FeedClosed { plugin: PLUGIN }),
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Idle monitor stopped");
        }
    }

    fn verify(&self) -> Result<()> {
        if self.config.idle_delay == 0 {
            return Err(Error::config(Role::ActivityMonitor, "idle_delay must be positive"));
        }
        if self.config.poll_interval_ms == 0 {
            return Err(Error::config(
                Role::ActivityMonitor,
                "poll_interval_ms must be positive",
            ));
        }
        Ok(())
    }
}

/// Connect to the display and check the XScreenSaver extension answers.
fn connect_screensaver() -> Result<(RustConnection, Window)> {
    let (conn, screen_num) = RustConnection::connect(None)?;
    let root = conn.setup().roots[screen_num].root;
    query_idle_time(&conn, root)?;
    Ok((conn, root))
}

fn query_idle_time(conn: &RustConnection, root: Window) -> Result<Duration> {
    let reply = conn.screensaver_query_info(root)?.reply()?;
    Ok(Duration::from_millis(u64::from(reply.ms_since_user_input)))
}

/// The new idle state if `idle_time` crosses `idle_delay` in either
/// direction.
fn transition(was_idle: bool, idle_time: Duration, idle_delay: Duration) -> Option<bool> {
    let is_idle = idle_time >= idle_delay;
    (is_idle != was_idle).then_some(is_idle)
}

struct IdlePolling {
    idle_delay: Duration,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    stopping: CancellationToken,
}

impl IdlePolling {
    fn should_run(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.stopping.is_cancelled()
    }
}

/// Poll loop run on the dedicated "idle-monitor" thread.
fn run_idle_monitor(
    conn: RustConnection,
    root: Window,
    polling: IdlePolling,
    samples: mpsc::UnboundedSender<Result<bool>>,
) {
    let mut was_idle = false;
    let mut failures = 0;

    while polling.should_run() {
        thread::sleep(polling.poll_interval);

        let idle_time = match query_idle_time(&conn, root) {
            Ok(idle_time) => {
                failures = 0;
                idle_time
            }
            Err(e) => {
                failures += 1;
                warn!("Failed to query X11 idle time: {}", e);
                if failures >= MAX_QUERY_FAILURES {
                    let _ = samples.send(Err(e));
                    break;
                }
                continue;
            }
        };

        if let Some(is_idle) = transition(was_idle, idle_time, polling.idle_delay) {
            debug!("Idle state changed to {} after {:?} without input", is_idle, idle_time);
            if samples.send(Ok(is_idle)).is_err() {
                break;
            }
            was_idle = is_idle;
        }
    }

    debug!("Idle monitor thread exiting");
}
