//! The runtime state machine.

use std::sync::Mutex;

use futures::{Stream, StreamExt};
use tracing::{debug, trace};

use tor_ctlevents::{EventBus, NetworkState, RuntimeEvent, TorDaemonState, TorState};

/// Holds the current [`TorState`] and enforces the legal transitions.
///
/// Daemon transitions follow this table (rows: from; columns: to):
///
/// |          | Off    | Starting | On     | Stopping |
/// |----------|--------|----------|--------|----------|
/// | Off      | noop   | ok       | ignore | ignore   |
/// | Starting | ok     | noop     | ok     | ok       |
/// | On       | ignore | ignore   | ok     | ok       |
/// | Stopping | ok     | ignore   | ignore | noop     |
///
/// An `On` → `On` update additionally never lowers the bootstrap
/// percentage: regressions within one phase are swallowed, so a
/// listener observes monotonic progress unless a `Starting` or
/// `Stopping` intervened.
///
/// Network updates are independent but are ignored while the daemon is
/// `Off`, and the network is forced `Disabled` by any transition to
/// `Off`.
pub struct StateManager {
    /// The current state.
    state: Mutex<TorState>,
    /// Serializes update+notify so notifications are totally ordered.
    update_lock: Mutex<()>,
    /// Where change notifications are published.
    bus: std::sync::Arc<EventBus>,
    /// Watch channel for stream-style consumers.
    watch_tx: Mutex<postage::watch::Sender<TorState>>,
    /// Kept so late subscribers can clone a receiver.
    watch_rx: postage::watch::Receiver<TorState>,
    /// Instance correlation key.
    fid: String,
}

impl StateManager {
    /// A manager starting from `Off`.
    pub fn new(bus: std::sync::Arc<EventBus>, fid: impl Into<String>) -> Self {
        let (watch_tx, watch_rx) = postage::watch::channel();
        StateManager {
            state: Mutex::new(TorState::off()),
            update_lock: Mutex::new(()),
            bus,
            watch_tx: Mutex::new(watch_tx),
            watch_rx,
            fid: fid.into(),
        }
    }

    /// The current snapshot.
    pub fn state(&self) -> TorState {
        *self.state.lock().expect("state poisoned")
    }

    /// A stream of snapshots, starting from the current one.
    pub fn events(&self) -> StateEvents {
        StateEvents {
            inner: self.watch_rx.clone(),
        }
    }

    /// Apply a daemon and/or network update.  Returns whether anything
    /// changed (and so whether a notification went out).
    pub fn update(
        &self,
        daemon: Option<TorDaemonState>,
        network: Option<NetworkState>,
    ) -> bool {
        let _ordering = self.update_lock.lock().expect("state poisoned");
        let old = self.state();
        let mut new = old;

        if let Some(daemon) = daemon {
            if let Some(next) = merge_daemon(old.daemon, daemon) {
                new.daemon = next;
            }
        }
        if let Some(network) = network {
            // Network changes mean nothing without a daemon.
            if new.daemon.is_alive() {
                new.network = network;
            } else {
                trace!("[{}] ignoring network update while Off", self.fid);
            }
        }
        if matches!(new.daemon, TorDaemonState::Off) {
            new.network = NetworkState::Disabled;
        }

        if new == old {
            return false;
        }
        *self.state.lock().expect("state poisoned") = new;
        debug!("[{}] state {} -> {}", self.fid, old, new);
        *self.watch_tx.lock().expect("state poisoned").borrow_mut() = new;
        self.bus.publish(&RuntimeEvent::State(new));
        true
    }

    /// Apply a daemon update alone.
    pub fn update_daemon(&self, daemon: TorDaemonState) -> bool {
        self.update(Some(daemon), None)
    }

    /// Apply a network update alone.
    pub fn update_network(&self, network: NetworkState) -> bool {
        self.update(None, Some(network))
    }
}

/// The daemon-transition table.  `None` means the update is swallowed.
fn merge_daemon(from: TorDaemonState, to: TorDaemonState) -> Option<TorDaemonState> {
    use TorDaemonState::*;
    match (from, to) {
        // Identical states are legal noops; the caller's equality check
        // suppresses the notification.
        (Off, Off) | (Starting, Starting) | (Stopping, Stopping) => Some(to),
        (Off, Starting) => Some(to),
        (Off, On { .. }) | (Off, Stopping) => None,
        (Starting, _) => Some(to),
        (On { .. }, Off) | (On { .. }, Starting) => None,
        (On { bootstrap: old }, On { bootstrap: new }) => {
            // Bootstrap never regresses within one On phase.
            (new >= old).then_some(to)
        }
        (On { .. }, Stopping) => Some(to),
        (Stopping, Off) => Some(to),
        (Stopping, Starting) | (Stopping, On { .. }) => None,
        (_, _) => unreachable!("TorDaemonState is non-exhaustive but only has Off/Starting/On/Stopping variants"),
    }
}

/// A [`Stream`] of [`TorState`] snapshots.
///
/// Not every intermediate state is guaranteed to be observed if the
/// consumer lags, but observations are always in order.
#[derive(Clone)]
pub struct StateEvents {
    /// The receiver implementing the stream.
    inner: postage::watch::Receiver<TorState>,
}

impl Stream for StateEvents {
    type Item = TorState;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for StateEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateEvents").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use tor_ctlevents::{EventKey, Observer, OnEvent};

    fn mgr() -> StateManager {
        StateManager::new(Arc::new(EventBus::new()), "test0000")
    }

    fn on(bootstrap: u8) -> TorDaemonState {
        TorDaemonState::On { bootstrap }
    }

    #[test]
    fn legal_start_cycle() {
        let m = mgr();
        assert!(m.update_daemon(TorDaemonState::Starting));
        assert!(m.update_daemon(on(0)));
        assert!(m.update_daemon(TorDaemonState::Stopping));
        assert!(m.update_daemon(TorDaemonState::Off));
        assert_eq!(m.state().daemon, TorDaemonState::Off);
    }

    #[test]
    fn illegal_transitions_are_swallowed() {
        let m = mgr();
        // Off -> On, Off -> Stopping: ignored.
        assert!(!m.update_daemon(on(50)));
        assert!(!m.update_daemon(TorDaemonState::Stopping));
        assert_eq!(m.state().daemon, TorDaemonState::Off);

        m.update_daemon(TorDaemonState::Starting);
        m.update_daemon(on(10));
        // On -> Off, On -> Starting: ignored.
        assert!(!m.update_daemon(TorDaemonState::Off));
        assert!(!m.update_daemon(TorDaemonState::Starting));
        assert_eq!(m.state().daemon, on(10));

        m.update_daemon(TorDaemonState::Stopping);
        // Stopping -> Starting, Stopping -> On: ignored.
        assert!(!m.update_daemon(TorDaemonState::Starting));
        assert!(!m.update_daemon(on(10)));
    }

    #[test]
    fn noop_transitions_do_not_notify() {
        let m = mgr();
        assert!(!m.update_daemon(TorDaemonState::Off));
        m.update_daemon(TorDaemonState::Starting);
        assert!(!m.update_daemon(TorDaemonState::Starting));
    }

    #[test]
    fn bootstrap_progression_is_monotonic() {
        // 5 -> 50 -> 100, with regressions swallowed.
        let m = mgr();
        m.update_daemon(TorDaemonState::Starting);
        assert!(m.update_daemon(on(5)));
        assert!(m.update_daemon(on(50)));
        assert!(!m.update_daemon(on(30)));
        assert_eq!(m.state().daemon, on(50));
        assert!(m.update_daemon(on(100)));
        assert!(!m.update_daemon(on(100)));
    }

    #[test]
    fn network_rules() {
        let m = mgr();
        // Ignored while Off.
        assert!(!m.update_network(NetworkState::Enabled));
        assert_eq!(m.state().network, NetworkState::Disabled);

        m.update_daemon(TorDaemonState::Starting);
        // Enabling while Starting is allowed and recorded.
        assert!(m.update_network(NetworkState::Enabled));
        assert_eq!(m.state().network, NetworkState::Enabled);
        assert_eq!(m.state().daemon, TorDaemonState::Starting);

        // Forced Disabled by the transition to Off.
        m.update_daemon(TorDaemonState::Off);
        assert_eq!(m.state().network, NetworkState::Disabled);
    }

    #[test]
    fn notifications_are_ordered() {
        let bus = Arc::new(EventBus::new());
        let seen: Arc<StdMutex<Vec<TorState>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        bus.subscribe(
            Observer::new(EventKey::State, move |event| {
                if let RuntimeEvent::State(s) = event {
                    seen2.lock().unwrap().push(*s);
                }
            })
            .executing(OnEvent::Immediate),
        );
        let m = StateManager::new(bus, "test0000");
        m.update_daemon(TorDaemonState::Starting);
        m.update_daemon(on(5));
        m.update_daemon(on(50));
        m.update_daemon(on(100));
        m.update_daemon(TorDaemonState::Stopping);
        m.update_daemon(TorDaemonState::Off);

        let seen = seen.lock().unwrap();
        let daemons: Vec<TorDaemonState> = seen.iter().map(|s| s.daemon).collect();
        assert_eq!(
            daemons,
            vec![
                TorDaemonState::Starting,
                on(5),
                on(50),
                on(100),
                TorDaemonState::Stopping,
                TorDaemonState::Off,
            ]
        );
    }
}
