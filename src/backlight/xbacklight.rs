//! Keyboard backlight driven through the `xbacklight` command line tool.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::{accepts, BrightnessPolicy, KeyboardBacklight, StoredBrightness};
use crate::error::{Error, Result};

const XBACKLIGHT: &str = "xbacklight";

/// xbacklight works in percent.
const MAXIMUM: i64 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XBacklightConfig {
    /// Control name passed to `-ctrl`.
    pub control: String,
    /// Fade duration in milliseconds.
    pub fade_time: u32,
    pub fade_fps: u32,
    #[serde(flatten)]
    pub policy: BrightnessPolicy,
}

impl Default for XBacklightConfig {
    fn default() -> Self {
        Self {
            control: "chromeos::kbd_backlight".to_string(),
            fade_time: 300,
            fade_fps: 30,
            policy: BrightnessPolicy::default(),
        }
    }
}

pub struct XBacklight {
    config: XBacklightConfig,
    stored: StoredBrightness,
    started: AtomicBool,
}

impl XBacklight {
    pub fn new(config: XBacklightConfig) -> Self {
        Self {
            config,
            stored: StoredBrightness::default(),
            started: AtomicBool::new(false),
        }
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotStarted { plugin: XBACKLIGHT })
        }
    }

    async fn query(&self) -> Result<i64> {
        let output = Command::new(XBACKLIGHT)
            .args(["-ctrl", &self.config.control, "-get"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::Command {
                command: XBACKLIGHT,
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        parse_brightness(&output.stdout)
    }
}

fn parse_brightness(stdout: &[u8]) -> Result<i64> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    text.parse::<f64>()
        .map(|value| value.round() as i64)
        .map_err(|_| Error::Command {
            command: XBACKLIGHT,
            detail: format!("unexpected output {:?}", text),
        })
}

#[async_trait]
impl KeyboardBacklight for XBacklight {
    fn name(&self) -> &'static str {
        XBACKLIGHT
    }

    async fn start(&self) -> Result<()> {
        let current = self.query().await?;
        self.started.store(true, Ordering::SeqCst);
        info!(
            "xbacklight control {} ready, current brightness {}",
            self.config.control, current
        );
        Ok(())
    }

    async fn get_current(&self) -> Result<i64> {
        self.ensure_started()?;
        self.query().await
    }

    async fn set_absolute(&self, value: i64) -> Result<()> {
        self.ensure_started()?;
        if !accepts(value, MAXIMUM) {
            debug!("Ignoring brightness {} outside 0..={}", value, MAXIMUM);
            return Ok(());
        }

        let status = Command::new(XBACKLIGHT)
            .args(["-ctrl", &self.config.control])
            .args(["-set", &value.to_string()])
            .args(["-time", &self.config.fade_time.to_string()])
            .args(["-fps", &self.config.fade_fps.to_string()])
            .status()
            .await?;
        if !status.success() {
            return Err(Error::Command {
                command: XBACKLIGHT,
                detail: format!("setting brightness {} failed: {}", value, status),
            });
        }
        Ok(())
    }

    fn maximum(&self) -> i64 {
        MAXIMUM
    }

    fn policy(&self) -> &BrightnessPolicy {
        &self.config.policy
    }

    fn stored(&self) -> &StoredBrightness {
        &self.stored
    }
}
