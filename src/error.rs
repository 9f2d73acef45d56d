//! Error type shared by the hub, the plugin loader and the backends.

use thiserror::Error;

use crate::types::Role;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unusable configuration for one of the plugin sections.
    #[error("invalid [{section}] configuration: {reason}")]
    Config {
        section: &'static str,
        reason: String,
    },

    /// A device call was made before the plugin finished `start()`.
    #[error("{plugin} has not been started")]
    NotStarted { plugin: &'static str },

    /// A plugin failed while starting or inside one of its background tasks.
    #[error("{role} plugin failed")]
    Plugin {
        role: Role,
        #[source]
        source: Box<Error>,
    },

    #[error("hub was already started")]
    AlreadyStarted,

    /// A plugin's event source ended while the hub was still running.
    #[error("{plugin} event feed closed unexpectedly")]
    FeedClosed { plugin: &'static str },

    #[error("D-Bus call failed")]
    DBus(#[from] zbus::Error),

    #[error("failed to connect to X11 display")]
    X11Connect(#[from] x11rb::errors::ConnectError),

    #[error("X11 connection error")]
    X11Connection(#[from] x11rb::errors::ConnectionError),

    #[error("X11 request failed")]
    X11Reply(#[from] x11rb::errors::ReplyError),

    #[error("{command} failed: {detail}")]
    Command { command: &'static str, detail: String },

    #[error("background worker panicked")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(role: Role, reason: impl Into<String>) -> Self {
        Error::Config {
            section: role.section(),
            reason: reason.into(),
        }
    }

    /// Attribute this error to a plugin role, unless it already is.
    pub fn in_role(self, role: Role) -> Self {
        match self {
            err @ Error::Plugin { .. } => err,
            err => Error::Plugin {
                role,
                source: Box::new(err),
            },
        }
    }
}
