//! Slot for a plugin whose role may be switched off.

use std::sync::Arc;

/// A plugin instance for an optional role.
///
/// `Disabled` is a real state, not a stand-in object: every role operation on
/// a disabled slot is a no-op, so the hub never has to special-case it.
pub enum OptionalPlugin<T: ?Sized> {
    Enabled(Arc<T>),
    Disabled { reason: String },
}

impl<T: ?Sized> OptionalPlugin<T> {
    pub fn disabled(reason: impl Into<String>) -> Self {
        OptionalPlugin::Disabled {
            reason: reason.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, OptionalPlugin::Enabled(_))
    }

    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            OptionalPlugin::Enabled(plugin) => Some(plugin),
            OptionalPlugin::Disabled { .. } => None,
        }
    }
}

impl<T: ?Sized> Clone for OptionalPlugin<T> {
    fn clone(&self) -> Self {
        match self {
            OptionalPlugin::Enabled(plugin) => OptionalPlugin::Enabled(Arc::clone(plugin)),
            OptionalPlugin::Disabled { reason } => OptionalPlugin::Disabled {
                reason: reason.clone(),
            },
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for OptionalPlugin<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionalPlugin::Enabled(_) => f.write_str("Enabled"),
            OptionalPlugin::Disabled { reason } => {
                f.debug_struct("Disabled").field("reason", reason).finish()
            }
        }
    }
}
