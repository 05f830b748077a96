//! Signals deliverable with the `SIGNAL` command.

use std::fmt;

/// A signal name accepted by `SIGNAL`.
///
/// `Halt` and `Shutdown` are *privileged*: sending either terminates
/// the daemon, so the command queue treats them specially (everything
/// still enqueued behind them is cancelled).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TorSignal {
    /// Reload configuration (like SIGHUP).
    Reload,
    /// Controlled shutdown: close listeners, exit after a delay.
    Shutdown,
    /// Dump stats to the log.
    Dump,
    /// Raise log verbosity to debug.
    Debug,
    /// Immediate shutdown (like SIGTERM).
    Halt,
    /// Switch to clean circuits for new connections.
    NewNym,
    /// Forget all cached DNS results.
    ClearDnsCache,
    /// Emit a heartbeat log line.
    Heartbeat,
    /// Leave dormant mode.
    Active,
    /// Enter dormant mode.
    Dormant,
}

impl TorSignal {
    /// The wire name used in the `SIGNAL` command.
    pub fn name(self) -> &'static str {
        match self {
            TorSignal::Reload => "RELOAD",
            TorSignal::Shutdown => "SHUTDOWN",
            TorSignal::Dump => "DUMP",
            TorSignal::Debug => "DEBUG",
            TorSignal::Halt => "HALT",
            TorSignal::NewNym => "NEWNYM",
            TorSignal::ClearDnsCache => "CLEARDNSCACHE",
            TorSignal::Heartbeat => "HEARTBEAT",
            TorSignal::Active => "ACTIVE",
            TorSignal::Dormant => "DORMANT",
        }
    }

    /// True for the signals that stop the daemon.
    pub fn is_stop(self) -> bool {
        matches!(self, TorSignal::Halt | TorSignal::Shutdown)
    }
}

impl fmt::Display for TorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
