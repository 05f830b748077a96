//! The events a controller instance emits.

use std::fmt;
use std::sync::Arc;

use tor_ctlproto::{AsyncEvent, TorEventKind};

use crate::state::TorState;
use crate::uncaught::UncaughtError;

/// A lifecycle phase of a runtime component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LifecyclePhase {
    /// The component came into existence.
    OnCreate,
    /// The component began operating.
    OnStart,
    /// The component stopped operating.
    OnStop,
    /// The component was torn down.
    OnDestroy,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::OnCreate => "OnCreate",
            LifecyclePhase::OnStart => "OnStart",
            LifecyclePhase::OnStop => "OnStop",
            LifecyclePhase::OnDestroy => "OnDestroy",
        };
        write!(f, "{}", name)
    }
}

/// A lifecycle transition, attributable to one component of one
/// controller instance.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct LifecycleEvent {
    /// Which phase was entered.
    pub phase: LifecyclePhase,
    /// The component's name, e.g. `"supervisor"`.
    pub component: &'static str,
    /// The instance's file identifier.
    pub fid: String,
}

impl LifecycleEvent {
    /// Construct a lifecycle event.
    pub fn new(phase: LifecyclePhase, component: &'static str, fid: impl Into<String>) -> Self {
        LifecycleEvent {
            phase,
            component,
            fid: fid.into(),
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}[{}]", self.phase, self.component, self.fid)
    }
}

/// Severity of a runtime log event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum LogLevel {
    /// Diagnostic chatter.
    Debug,
    /// Ordinary operational messages.
    Info,
    /// Something is off but operation continues.
    Warn,
    /// Something failed.
    Error,
}

/// A log line: tor's own stdout/stderr, or a runtime diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct LogEvent {
    /// The severity.
    pub level: LogLevel,
    /// The message text.
    pub message: String,
}

impl LogEvent {
    /// Construct a log event.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        LogEvent {
            level,
            message: message.into(),
        }
    }
}

/// Any event a controller instance can emit.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RuntimeEvent {
    /// A component lifecycle transition.
    Lifecycle(LifecycleEvent),
    /// A log line.
    Log(LogEvent),
    /// A state snapshot after a transition.
    State(TorState),
    /// A `6xx` frame from the control connection.
    Tor(AsyncEvent),
    /// An error raised by an observer or callback.
    Error(Arc<UncaughtError>),
}

impl RuntimeEvent {
    /// The subscription key this event dispatches under.
    pub fn key(&self) -> EventKey {
        match self {
            RuntimeEvent::Lifecycle(_) => EventKey::Lifecycle,
            RuntimeEvent::Log(_) => EventKey::Log,
            RuntimeEvent::State(_) => EventKey::State,
            RuntimeEvent::Tor(ev) => match ev.kind() {
                Some(kind) => EventKey::Tor(kind),
                None => EventKey::TorUnrecognized,
            },
            RuntimeEvent::Error(_) => EventKey::Error,
        }
    }
}

/// What an observer subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKey {
    /// Lifecycle transitions.
    Lifecycle,
    /// Log lines.
    Log,
    /// State snapshots.
    State,
    /// Observer/callback errors.
    Error,
    /// One recognized control-event kind.
    Tor(TorEventKind),
    /// Control events whose keyword is not in the catalogue.
    TorUnrecognized,
}
