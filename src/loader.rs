//! Resolves configured backend tags to plugin instances.
//!
//! The keyboard backlight is mandatory: anything wrong with its section is a
//! fatal [`Error::Config`]. The activity monitor and light sensor degrade to
//! [`OptionalPlugin::Disabled`] when their backend cannot be built, so a
//! broken optional role never takes the daemon down.

use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use toml::{Table, Value};
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityMonitor, GnomeIdleMonitor, XScreenSaverMonitor};
use crate::backlight::{
    GnomeBacklight, KeyboardBacklight, UPowerBacklight, XBacklight, DEFAULT_KEYBOARD_MIN_BRIGHTNESS,
    DEFAULT_LUX_FOR_KEYBOARD_OFF, DEFAULT_LUX_FOR_MAX_BRIGHTNESS, DEFAULT_LUX_FOR_MIN_BRIGHTNESS,
};
use crate::config::PluginSection;
use crate::error::{Error, Result};
use crate::hub::HubHandle;
use crate::light::{LightSensor, SensorProxyLightSensor};
use crate::plugin::OptionalPlugin;
use crate::types::Role;

/// Seconds without input before the activity monitor reports idle.
pub const DEFAULT_IDLE_DELAY: i64 = 30;

/// Builds a plugin from its hub handle and config fragment.
type Factory<T> = fn(&HubHandle, Table) -> Result<Arc<T>>;

/// Declare a backend tag enum that parses from its configured name.
macro_rules! backend_tags {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const TAGS: &'static [&'static str] = &[$($tag),+];

            pub fn tag(self) -> &'static str {
                match self {
                    $(Self::$variant => $tag),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unknown backend {:?}, expected one of: {}",
                        other,
                        Self::TAGS.join(", ")
                    )),
                }
            }
        }
    };
}

backend_tags!(
    /// Backends for the `[activity_monitor]` section.
    ActivityMonitorBackend {
        XScreenSaver => "xscreensaver",
        GnomeDBus => "gnome_dbus",
    }
);

backend_tags!(
    /// Backends for the `[keyboard_backlight]` section.
    KeyboardBacklightBackend {
        UPower => "upower",
        XBacklight => "xbacklight",
        GnomeDBus => "dbus_gnome",
    }
);

backend_tags!(
    /// Backends for the `[light_sensor]` section. `none` turns the role off.
    LightSensorBackend {
        SensorProxy => "sensorproxy",
        Disabled => "none",
    }
);

impl ActivityMonitorBackend {
    fn factory(self) -> Factory<dyn ActivityMonitor> {
        match self {
            Self::XScreenSaver => xscreensaver,
            Self::GnomeDBus => gnome_idle_monitor,
        }
    }
}

impl KeyboardBacklightBackend {
    fn factory(self) -> Factory<dyn KeyboardBacklight> {
        match self {
            Self::UPower => upower,
            Self::XBacklight => xbacklight,
            Self::GnomeDBus => gnome_backlight,
        }
    }
}

impl LightSensorBackend {
    fn factory(self) -> Option<Factory<dyn LightSensor>> {
        match self {
            Self::SensorProxy => Some(sensorproxy),
            Self::Disabled => None,
        }
    }
}

fn xscreensaver(hub: &HubHandle, options: Table) -> Result<Arc<dyn ActivityMonitor>> {
    let config = typed_config(Role::ActivityMonitor, options)?;
    Ok(Arc::new(XScreenSaverMonitor::new(hub.clone(), config)))
}

fn gnome_idle_monitor(hub: &HubHandle, options: Table) -> Result<Arc<dyn ActivityMonitor>> {
    let config = typed_config(Role::ActivityMonitor, options)?;
    Ok(Arc::new(GnomeIdleMonitor::new(hub.clone(), config)))
}

fn upower(_hub: &HubHandle, options: Table) -> Result<Arc<dyn KeyboardBacklight>> {
    let config = typed_config(Role::KeyboardBacklight, options)?;
    Ok(Arc::new(UPowerBacklight::new(config)))
}

fn xbacklight(_hub: &HubHandle, options: Table) -> Result<Arc<dyn KeyboardBacklight>> {
    let config = typed_config(Role::KeyboardBacklight, options)?;
    Ok(Arc::new(XBacklight::new(config)))
}

fn gnome_backlight(_hub: &HubHandle, options: Table) -> Result<Arc<dyn KeyboardBacklight>> {
    let config = typed_config(Role::KeyboardBacklight, options)?;
    Ok(Arc::new(GnomeBacklight::new(config)))
}

fn sensorproxy(hub: &HubHandle, _options: Table) -> Result<Arc<dyn LightSensor>> {
    Ok(Arc::new(SensorProxyLightSensor::new(hub.clone())))
}

/// Fill in the role-wide keys a backend fragment did not set.
pub fn apply_defaults(role: Role, options: &mut Table) {
    let defaults: &[(&str, i64)] = match role {
        Role::ActivityMonitor => &[("idle_delay", DEFAULT_IDLE_DELAY)],
        Role::KeyboardBacklight => &[
            ("keyboard_min_brightness", DEFAULT_KEYBOARD_MIN_BRIGHTNESS),
            ("lux_for_keyboard_off", DEFAULT_LUX_FOR_KEYBOARD_OFF),
            ("lux_for_max_brightness", DEFAULT_LUX_FOR_MAX_BRIGHTNESS),
            ("lux_for_min_brightness", DEFAULT_LUX_FOR_MIN_BRIGHTNESS),
        ],
        Role::LightSensor => &[],
    };
    for (key, value) in defaults {
        options
            .entry(key.to_string())
            .or_insert(Value::Integer(*value));
    }
}

fn typed_config<T: DeserializeOwned>(role: Role, options: Table) -> Result<T> {
    Value::Table(options)
        .try_into()
        .map_err(|e: toml::de::Error| Error::config(role, e.message().to_string()))
}

fn backend_of<B>(role: Role, section: &PluginSection) -> Result<B>
where
    B: FromStr<Err = String>,
{
    let tag = section
        .backend
        .as_deref()
        .ok_or_else(|| Error::config(role, "missing backend `type`"))?;
    tag.parse().map_err(|reason: String| Error::config(role, reason))
}

fn fragment(role: Role, section: &PluginSection) -> Table {
    let mut options = section.options.clone();
    apply_defaults(role, &mut options);
    options
}

pub fn load_activity_monitor(
    hub: &HubHandle,
    section: Option<&PluginSection>,
) -> Result<OptionalPlugin<dyn ActivityMonitor>> {
    let role = Role::ActivityMonitor;
    let section = section.ok_or_else(|| Error::config(role, "section is missing"))?;
    if section.backend.is_none() {
        return Err(Error::config(role, "missing backend `type`"));
    }

    let built = backend_of::<ActivityMonitorBackend>(role, section).and_then(|backend| {
        debug!("Building activity monitor backend {:?}", backend.tag());
        (backend.factory())(hub, fragment(role, section))
    });
    let monitor = match built {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Activity monitor unavailable, idle detection disabled: {}", e);
            return Ok(OptionalPlugin::disabled(e.to_string()));
        }
    };

    if let Err(e) = monitor.verify() {
        warn!("Activity monitor {} failed verification, using it anyway: {}", monitor.name(), e);
    }
    info!("Loaded activity monitor: {}", monitor.name());
    Ok(OptionalPlugin::Enabled(monitor))
}

pub fn load_keyboard_backlight(
    hub: &HubHandle,
    section: Option<&PluginSection>,
) -> Result<Arc<dyn KeyboardBacklight>> {
    let role = Role::KeyboardBacklight;
    let section = section.ok_or_else(|| Error::config(role, "section is missing"))?;
    let backend = backend_of::<KeyboardBacklightBackend>(role, section)?;
    debug!("Building keyboard backlight backend {:?}", backend.tag());

    let backlight = (backend.factory())(hub, fragment(role, section))?;
    backlight.verify()?;
    info!("Loaded keyboard backlight: {}", backlight.name());
    Ok(backlight)
}

pub fn load_light_sensor(
    hub: &HubHandle,
    section: Option<&PluginSection>,
) -> OptionalPlugin<dyn LightSensor> {
    let role = Role::LightSensor;
    let Some(section) = section else {
        info!("No [light_sensor] section, ambient light is ignored");
        return OptionalPlugin::disabled("no [light_sensor] section");
    };

    let backend = match backend_of::<LightSensorBackend>(role, section) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Light sensor unavailable: {}", e);
            return OptionalPlugin::disabled(e.to_string());
        }
    };
    let Some(factory) = backend.factory() else {
        info!("Light sensor disabled by configuration");
        return OptionalPlugin::disabled(format!("type = {:?}", backend.tag()));
    };

    debug!("Building light sensor backend {:?}", backend.tag());
    let sensor = match factory(hub, fragment(role, section)) {
        Ok(sensor) => sensor,
        Err(e) => {
            error!("Light sensor unavailable: {}", e);
            return OptionalPlugin::disabled(e.to_string());
        }
    };
    if let Err(e) = sensor.verify() {
        warn!("Light sensor {} failed verification, using it anyway: {}", sensor.name(), e);
    }
    info!("Loaded light sensor: {}", sensor.name());
    OptionalPlugin::Enabled(sensor)
}
