//! Controller state snapshots.
//!
//! The transition rules live with the state manager in the umbrella
//! crate; these are the immutable values that managers hold, events
//! carry, and callers inspect.

use std::fmt;

/// The daemon half of the controller state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TorDaemonState {
    /// No process is running.
    Off,
    /// A process is being spawned and connected.
    Starting,
    /// The daemon is up; carries its last reported bootstrap progress.
    On {
        /// Bootstrap percentage, `0..=100`.
        bootstrap: u8,
    },
    /// The daemon is being shut down.
    Stopping,
}

impl TorDaemonState {
    /// True if a process exists in this state.
    pub fn is_alive(self) -> bool {
        !matches!(self, TorDaemonState::Off)
    }

    /// The bootstrap percentage, if the daemon is on.
    pub fn bootstrap(self) -> Option<u8> {
        match self {
            TorDaemonState::On { bootstrap } => Some(bootstrap),
            _ => None,
        }
    }
}

impl fmt::Display for TorDaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorDaemonState::Off => write!(f, "Off"),
            TorDaemonState::Starting => write!(f, "Starting"),
            TorDaemonState::On { bootstrap } => write!(f, "On({}%)", bootstrap),
            TorDaemonState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// The network half of the controller state (`DisableNetwork` inverted).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum NetworkState {
    /// tor may touch the network.
    Enabled,
    /// tor is configured off the network.
    Disabled,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Enabled => write!(f, "Enabled"),
            NetworkState::Disabled => write!(f, "Disabled"),
        }
    }
}

/// An immutable snapshot of a controller instance's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct TorState {
    /// The daemon lifecycle.
    pub daemon: TorDaemonState,
    /// The network toggle.
    pub network: NetworkState,
}

impl TorState {
    /// The initial state: off, network disabled.
    pub fn off() -> Self {
        TorState {
            daemon: TorDaemonState::Off,
            network: NetworkState::Disabled,
        }
    }
}

impl Default for TorState {
    fn default() -> Self {
        TorState::off()
    }
}

impl fmt::Display for TorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / network {}", self.daemon, self.network)
    }
}
