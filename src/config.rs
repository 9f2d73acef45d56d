//! Configuration loading from TOML files and environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure.
///
/// Plugin sections keep their keys as raw TOML; the plugin loader applies
/// role defaults and hands the fragment to the selected backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_monitor: Option<PluginSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard_backlight: Option<PluginSection>,
    /// Absent means no ambient light sensing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_sensor: Option<PluginSection>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One plugin section: the backend tag plus the backend's own keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSection {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(flatten)]
    pub options: toml::Table,
}

impl PluginSection {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: Some(backend.into()),
            options: toml::Table::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_activity_monitor() -> String {
    "xscreensaver".to_string()
}

fn default_keyboard_backlight() -> String {
    "upower".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            activity_monitor: Some(PluginSection::new(default_activity_monitor())),
            keyboard_backlight: Some(PluginSection::new(default_keyboard_backlight())),
            light_sensor: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_locations(&default_paths())?,
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// First existing file among `paths`, or the built-in defaults.
    fn from_default_locations(paths: &[PathBuf]) -> Result<Self> {
        for path in paths {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::default())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `BACKLIGHTD_*` overrides looked up through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("BACKLIGHTD_ACTIVITY_MONITOR") {
            self.activity_monitor.get_or_insert_with(Default::default).backend = Some(val);
        }
        if let Some(val) = var("BACKLIGHTD_IDLE_DELAY") {
            if let Ok(v) = val.parse::<i64>() {
                self.activity_monitor
                    .get_or_insert_with(Default::default)
                    .options
                    .insert("idle_delay".to_string(), toml::Value::Integer(v));
            }
        }
        if let Some(val) = var("BACKLIGHTD_KEYBOARD_BACKLIGHT") {
            self.keyboard_backlight.get_or_insert_with(Default::default).backend = Some(val);
        }
        if let Some(val) = var("BACKLIGHTD_LIGHT_SENSOR") {
            self.light_sensor.get_or_insert_with(Default::default).backend = Some(val);
        }
        if let Some(val) = var("BACKLIGHTD_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Validate configuration values that do not belong to a backend.
    pub fn validate(&self) -> Result<()> {
        if self.logging.level.trim().is_empty() {
            anyhow::bail!("Log level cannot be empty");
        }
        Ok(())
    }
}

fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("config/default.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("backlightd/config.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn parses_sections_and_keeps_backend_keys() {
        let config: Config = toml::from_str(
            r#"
            [activity_monitor]
            type = "xscreensaver"
            idle_delay = 60

            [keyboard_backlight]
            type = "xbacklight"
            control = "asus::kbd_backlight"
            lux_for_keyboard_off = 500

            [light_sensor]
            type = "sensorproxy"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let activity = config.activity_monitor.unwrap();
        assert_eq!(activity.backend.as_deref(), Some("xscreensaver"));
        assert_eq!(activity.options["idle_delay"].as_integer(), Some(60));
        assert!(!activity.options.contains_key("type"));

        let keyboard = config.keyboard_backlight.unwrap();
        assert_eq!(keyboard.options["control"].as_str(), Some("asus::kbd_backlight"));
        assert_eq!(config.light_sensor.unwrap().backend.as_deref(), Some("sensorproxy"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn missing_sections_stay_missing() {
        let config: Config = toml::from_str("[keyboard_backlight]\ntype = \"upower\"").unwrap();

        assert!(config.activity_monitor.is_none());
        assert!(config.light_sensor.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[keyboard_backlight]\ntype = \"xbacklight\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(
            config.keyboard_backlight.unwrap().backend.as_deref(),
            Some("xbacklight")
        );
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[keyboard_backlight").unwrap();

        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn first_existing_location_wins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("present.toml");
        std::fs::write(&present, "[light_sensor]\ntype = \"none\"").unwrap();

        let config = Config::from_default_locations(&[missing, present]).unwrap();

        assert_eq!(config.light_sensor.unwrap().backend.as_deref(), Some("none"));
        assert!(config.keyboard_backlight.is_none());
    }

    #[test]
    fn no_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::from_default_locations(&[dir.path().join("nope.toml")]).unwrap();

        assert_eq!(config.activity_monitor, Some(PluginSection::new("xscreensaver")));
        assert_eq!(config.keyboard_backlight, Some(PluginSection::new("upower")));
        assert!(config.light_sensor.is_none());
    }

    #[test]
    fn env_overrides_replace_backends_and_idle_delay() {
        let mut config = Config::default();

        config.apply_overrides(overrides(&[
            ("BACKLIGHTD_IDLE_DELAY", "120"),
            ("BACKLIGHTD_KEYBOARD_BACKLIGHT", "xbacklight"),
            ("BACKLIGHTD_LIGHT_SENSOR", "sensorproxy"),
            ("BACKLIGHTD_LOG_LEVEL", "debug"),
        ]));

        let activity = config.activity_monitor.unwrap();
        assert_eq!(activity.backend.as_deref(), Some("xscreensaver"));
        assert_eq!(activity.options["idle_delay"].as_integer(), Some(120));
        assert_eq!(
            config.keyboard_backlight.unwrap().backend.as_deref(),
            Some("xbacklight")
        );
        assert_eq!(config.light_sensor.unwrap().backend.as_deref(), Some("sensorproxy"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn unparsable_idle_delay_override_is_ignored() {
        let mut config = Config::default();

        config.apply_overrides(overrides(&[("BACKLIGHTD_IDLE_DELAY", "soon")]));

        assert!(config.activity_monitor.unwrap().options.is_empty());
    }

    #[test]
    fn empty_log_level_is_rejected() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.logging.level = " ".to_string();
        assert!(config.validate().is_err());
    }
}
