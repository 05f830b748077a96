//! The runtime: one supervised tor instance behind a typed interface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use tor_ctlconf::{
    generate, ConfigCallback, ConfigContext, TcpPortProbe, TorConfigBuilder, TorOption,
};
use tor_ctlconn::{ConnError, ControlConn, JobHandle};
use tor_ctlevents::{
    default_uncaught_handler, EventBus, EventKey, LifecycleEvent, LifecyclePhase, NetworkState,
    Observer, ObserverTag, OnEvent, RuntimeEvent, Subscription, TorDaemonState, TorState,
    UncaughtHandler,
};
use tor_ctlproto::{AuthToken, Bootstrapped, CmdOutput, TorCmd, TorEventKind, TorSignal};
use tor_procmgr::{start_with_zombie_retry, SpawnConfig, StopMark, Supervisor};

use crate::action::{enqueue_action, Action, ActionJob, ActionSlots};
use crate::env::Environment;
use crate::err::Error;
use crate::registry;
use crate::state::{StateEvents, StateManager};

/// Component name in the runtime's own lifecycle events.
const COMPONENT: &str = "runtime";

/// Event kinds re-established with `SETEVENTS` after each start.
const SUBSCRIBED_EVENTS: &[TorEventKind] = &[
    TorEventKind::Notice,
    TorEventKind::Warn,
    TorEventKind::Err,
    TorEventKind::StatusClient,
    TorEventKind::HsDesc,
];

/// How long a polite `SIGNAL SHUTDOWN` gets before the supervisor's
/// SIGTERM takes over.
const SHUTDOWN_CMD_TIMEOUT: Duration = Duration::from_secs(2);

/// The live pieces of a started instance.
struct Live {
    /// The process supervisor.
    supervisor: Arc<Supervisor>,
    /// The control connection, once opened.
    conn: Option<Arc<ControlConn>>,
}

/// The shared core of one runtime instance.
pub(crate) struct RtInner {
    /// The environment.
    env: Environment,
    /// The event bus.
    bus: Arc<EventBus>,
    /// Where uncaught callback errors are routed.
    handler: UncaughtHandler,
    /// The state machine.
    states: StateManager,
    /// User config callbacks, applied at every generation.
    callbacks: Vec<ConfigCallback>,
    /// The live supervisor/connection, while started.
    live: StdMutex<Option<Live>>,
    /// Shared inter-start gap record.
    stop_mark: Arc<StopMark>,
    /// Cooperative interruption of an in-flight start.
    interrupt_start: Arc<AtomicBool>,
    /// Serializes the start/stop bodies.
    op_lock: tokio::sync::Mutex<()>,
    /// Action coalescing slots.
    actions: ActionSlots,
    /// The runtime's own (static-tagged) subscriptions.
    static_subs: StdMutex<Vec<Subscription>>,
}

impl RtInner {
    /// The instance identity.
    pub(crate) fn fid(&self) -> &str {
        self.env.fid()
    }

    /// The action slots.
    pub(crate) fn actions(&self) -> &ActionSlots {
        &self.actions
    }

    /// The shared start-interruption flag.
    pub(crate) fn interrupt_start_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_start)
    }

    /// Fail with [`Error::Cancelled`] if a stop has interrupted us.
    fn check_interrupt(&self) -> Result<(), Error> {
        if self.interrupt_start.load(Ordering::SeqCst) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The live control connection, if the daemon is up.
    fn conn(&self) -> Option<Arc<ControlConn>> {
        self.live
            .lock()
            .expect("runtime poisoned")
            .as_ref()
            .and_then(|l| l.conn.clone())
    }

    /// Emit a lifecycle event for this runtime.
    fn lifecycle(&self, phase: LifecyclePhase) {
        self.bus
            .publish(&RuntimeEvent::Lifecycle(LifecycleEvent::new(
                phase,
                COMPONENT,
                self.fid().to_owned(),
            )));
    }

    /// The `Start` action body.
    pub(crate) async fn start_instance(self: &Arc<Self>) -> Result<(), Error> {
        let _op = self.op_lock.lock().await;
        if matches!(self.states.state().daemon, TorDaemonState::On { .. }) {
            debug!("[{}] start requested but already on", self.fid());
            return Ok(());
        }
        self.interrupt_start.store(false, Ordering::SeqCst);
        self.states.update_daemon(TorDaemonState::Starting);

        match self.do_start().await {
            Ok(()) => {
                self.states.update_daemon(TorDaemonState::On { bootstrap: 0 });
                self.lifecycle(LifecyclePhase::OnStart);
                Ok(())
            }
            Err(e) => {
                // Unwind whatever was created; a cancelled or failed
                // start leaves the state Off.
                self.teardown_live().await;
                self.states.update_daemon(TorDaemonState::Off);
                Err(e)
            }
        }
    }

    /// Start, step by step: generate, spawn, connect, authenticate,
    /// take ownership, load the config, subscribe to events.
    async fn do_start(self: &Arc<Self>) -> Result<(), Error> {
        self.check_interrupt()?;

        let mut ctx = ConfigContext::new(self.env.work_dir(), self.env.cache_dir());
        ctx.omit_geoip = self.env.omit_geoip();
        if let Some(geoip) = self.env.loader().geoip_files() {
            ctx.geoip_file = Some(geoip.v4);
            ctx.geoip6_file = Some(geoip.v6);
        }
        let generated = generate(&ctx, &self.callbacks, &TcpPortProbe::default()).await?;

        self.check_interrupt()?;
        let mut spawn_cfg = SpawnConfig::new(
            self.env.loader().tor_executable()?,
            generated.argv.clone(),
            generated.ctrl_port_file.clone(),
        );
        spawn_cfg.dirs = vec![
            self.env.work_dir().to_path_buf(),
            self.env.cache_dir().to_path_buf(),
        ];
        spawn_cfg.cookie_auth_file = Some(generated.cookie_auth_file.clone());

        let (supervisor, running) = start_with_zombie_retry(
            spawn_cfg,
            Arc::clone(&self.bus),
            Arc::clone(&self.stop_mark),
            self.fid().to_owned(),
        )
        .await?;
        *self.live.lock().expect("runtime poisoned") = Some(Live {
            supervisor: Arc::new(supervisor),
            conn: None,
        });

        self.check_interrupt()?;
        let conn = Arc::new(
            ControlConn::connect(
                &running.endpoint,
                Arc::clone(&self.bus),
                Arc::clone(&self.handler),
                self.fid().to_owned(),
            )
            .await?,
        );
        if let Some(live) = self.live.lock().expect("runtime poisoned").as_mut() {
            live.conn = Some(Arc::clone(&conn));
        }

        let token = match running.auth_cookie {
            Some(cookie) => AuthToken::Cookie(cookie),
            None => AuthToken::None,
        };
        conn.authenticate(TorCmd::Authenticate { token }).await?;

        self.check_interrupt()?;
        // Belt and braces: tor dies with this connection, and stops
        // watching our PID.
        conn.enqueue(TorCmd::TakeOwnership).wait().await?;
        conn.enqueue(TorCmd::ResetConf {
            options: vec![TorOption::OwningControllerProcess],
        })
        .wait()
        .await?;
        conn.enqueue(TorCmd::LoadConf {
            config: generated.config.clone(),
        })
        .wait()
        .await?;
        conn.enqueue(TorCmd::SetEvents {
            kinds: SUBSCRIBED_EVENTS.to_vec(),
        })
        .wait()
        .await?;

        info!("[{}] runtime started", self.fid());
        Ok(())
    }

    /// The `Stop` action body.  Never abandoned: the action layer runs
    /// it on a detached task.
    pub(crate) async fn stop_instance(self: &Arc<Self>) -> Result<(), Error> {
        // Interrupt any in-flight start first, then wait our turn.
        self.interrupt_start.store(true, Ordering::SeqCst);
        let _op = self.op_lock.lock().await;
        self.interrupt_start.store(false, Ordering::SeqCst);

        let is_off = matches!(self.states.state().daemon, TorDaemonState::Off);
        let has_live = self.live.lock().expect("runtime poisoned").is_some();
        if is_off && !has_live {
            debug!("[{}] stop requested but already off", self.fid());
            return Ok(());
        }
        self.states.update_daemon(TorDaemonState::Stopping);

        if let Some(conn) = self.conn() {
            // Ask politely first; the SIGTERM below is the backstop.
            let shutdown = conn.enqueue(TorCmd::Signal(TorSignal::Shutdown));
            if tokio::time::timeout(SHUTDOWN_CMD_TIMEOUT, shutdown.wait())
                .await
                .is_err()
            {
                warn!("[{}] SIGNAL SHUTDOWN went unanswered", self.fid());
            }
        }
        self.teardown_live().await;
        self.states.update_daemon(TorDaemonState::Off);
        self.lifecycle(LifecyclePhase::OnStop);
        Ok(())
    }

    /// Destroy the live connection and supervisor, if any.
    async fn teardown_live(&self) {
        let live = self.live.lock().expect("runtime poisoned").take();
        if let Some(live) = live {
            if let Some(conn) = live.conn {
                conn.destroy();
            }
            live.supervisor.destroy().await;
        }
    }

    /// Tear the whole runtime down: stop the daemon, drop the
    /// runtime's own subscriptions.
    pub(crate) async fn destroy(self: &Arc<Self>) {
        let _ = self.stop_instance().await;
        let subs = std::mem::take(&mut *self.static_subs.lock().expect("runtime poisoned"));
        for sub in subs {
            self.bus.unsubscribe(&sub);
        }
        self.lifecycle(LifecyclePhase::OnDestroy);
    }
}

/// Builder for [`TorRuntime`].
pub struct TorRuntimeBuilder {
    /// The environment.
    env: Environment,
    /// User config callbacks.
    callbacks: Vec<ConfigCallback>,
    /// Observers subscribed at build.
    observers: Vec<Observer>,
    /// Replacement uncaught handler.
    handler: Option<UncaughtHandler>,
}

impl TorRuntimeBuilder {
    /// Add a configuration callback, applied (in order) on every
    /// start.
    pub fn config<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TorConfigBuilder) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(f));
        self
    }

    /// Subscribe an observer at build time.
    pub fn observer(mut self, observer: Observer) -> Self {
        self.observers.push(observer);
        self
    }

    /// Route uncaught observer/callback errors to `handler`.
    pub fn uncaught_handler(mut self, handler: UncaughtHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Build (or join) the runtime for this environment.
    ///
    /// One runtime exists per `fid`: if one is already live, it is
    /// returned, the callbacks are discarded, and the observers are
    /// subscribed to the existing bus.
    pub fn build(self) -> TorRuntime {
        let TorRuntimeBuilder {
            env,
            callbacks,
            observers,
            handler,
        } = self;
        let handler = handler.unwrap_or_else(default_uncaught_handler);
        let fid = env.fid().to_owned();
        let (inner, created) = registry::get_or_create(&fid, || {
            let bus = Arc::new(EventBus::with_handler(Arc::clone(&handler)));
            let states = StateManager::new(Arc::clone(&bus), fid.clone());
            Arc::new(RtInner {
                env,
                bus,
                handler,
                states,
                callbacks,
                live: StdMutex::new(None),
                stop_mark: StopMark::new(),
                interrupt_start: Arc::new(AtomicBool::new(false)),
                op_lock: tokio::sync::Mutex::new(()),
                actions: ActionSlots::default(),
                static_subs: StdMutex::new(Vec::new()),
            })
        });
        if created {
            install_bootstrap_observers(&inner);
            inner.lifecycle(LifecyclePhase::OnCreate);
        } else {
            debug!("[{}] joining existing runtime", inner.fid());
        }
        for observer in observers {
            inner.bus.subscribe(observer);
        }
        TorRuntime { inner }
    }
}

/// Wire the runtime's own observers: bootstrap notices drive the state
/// machine.  Static-tagged, so callers' bulk unsubscribes cannot break
/// them; the closures hold the runtime weakly to avoid a cycle through
/// the bus.
fn install_bootstrap_observers(inner: &Arc<RtInner>) {
    let tag = ObserverTag::new_static(format!("torctl.{}", inner.fid()));
    let mut subs = Vec::new();

    let weak: Weak<RtInner> = Arc::downgrade(inner);
    subs.push(inner.bus.subscribe(
        Observer::new(EventKey::Tor(TorEventKind::Notice), move |event| {
            let Some(rt) = weak.upgrade() else { return };
            if let RuntimeEvent::Tor(ev) = event {
                if let Some(b) = Bootstrapped::from_notice(ev.content()) {
                    rt.states.update_daemon(TorDaemonState::On {
                        bootstrap: b.progress,
                    });
                }
            }
        })
        .tagged(tag.clone())
        .executing(OnEvent::Immediate),
    ));

    let weak: Weak<RtInner> = Arc::downgrade(inner);
    subs.push(inner.bus.subscribe(
        Observer::new(EventKey::Tor(TorEventKind::StatusClient), move |event| {
            let Some(rt) = weak.upgrade() else { return };
            if let RuntimeEvent::Tor(ev) = event {
                if let Some(b) = Bootstrapped::from_status_client(ev.content()) {
                    rt.states.update_daemon(TorDaemonState::On {
                        bootstrap: b.progress,
                    });
                }
            }
        })
        .tagged(tag)
        .executing(OnEvent::Immediate),
    ));

    *inner.static_subs.lock().expect("runtime poisoned") = subs;
}

/// A handle to one controller runtime.
///
/// Cheap to clone; all clones share the instance.
#[derive(Clone)]
pub struct TorRuntime {
    /// The shared core.
    inner: Arc<RtInner>,
}

impl TorRuntime {
    /// Start building a runtime over `env`.
    pub fn builder(env: Environment) -> TorRuntimeBuilder {
        TorRuntimeBuilder {
            env,
            callbacks: Vec::new(),
            observers: Vec::new(),
            handler: None,
        }
    }

    /// The environment this runtime was built over.
    pub fn environment(&self) -> &Environment {
        &self.inner.env
    }

    /// The current state snapshot.
    pub fn state(&self) -> TorState {
        self.inner.states.state()
    }

    /// A stream of state snapshots.
    pub fn state_events(&self) -> StateEvents {
        self.inner.states.events()
    }

    /// Subscribe an observer.
    pub fn subscribe(&self, observer: Observer) -> Subscription {
        self.inner.bus.subscribe(observer)
    }

    /// Remove one subscription.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.inner.bus.unsubscribe(subscription);
    }

    /// Remove every observer with `tag` (static-tagged observers are
    /// exempt).
    pub fn unsubscribe_all(&self, tag: &ObserverTag) {
        self.inner.bus.unsubscribe_all_by_tag(tag);
    }

    /// Begin a `Start`; returns the (possibly coalesced) job.
    pub fn start(&self) -> ActionJob {
        enqueue_action(&self.inner, Action::Start)
    }

    /// Begin a `Stop`; never abandoned once begun.
    pub fn stop(&self) -> ActionJob {
        enqueue_action(&self.inner, Action::Stop)
    }

    /// Begin a `Restart`: a stop and a start sharing one job.
    pub fn restart(&self) -> ActionJob {
        enqueue_action(&self.inner, Action::Restart)
    }

    /// Enqueue a control command on the live connection.
    pub fn enqueue(&self, cmd: TorCmd) -> Result<JobHandle, Error> {
        match self.inner.conn() {
            Some(conn) => Ok(conn.enqueue(cmd)),
            None => Err(Error::Conn(ConnError::ConnectionClosed)),
        }
    }

    /// Let tor touch the network (`DisableNetwork 0`).
    pub async fn enable_network(&self) -> Result<(), Error> {
        self.set_network(true).await
    }

    /// Take tor off the network (`DisableNetwork 1`).
    pub async fn disable_network(&self) -> Result<(), Error> {
        self.set_network(false).await
    }

    /// Flip `DisableNetwork` and record the result in the state.
    async fn set_network(&self, enabled: bool) -> Result<(), Error> {
        let setting = tor_ctlconf::Setting::with_value(
            TorOption::DisableNetwork,
            if enabled { "0" } else { "1" },
        );
        self.enqueue(TorCmd::SetConf {
            settings: vec![setting],
        })?
        .wait()
        .await?;
        self.inner.states.update_network(if enabled {
            NetworkState::Enabled
        } else {
            NetworkState::Disabled
        });
        Ok(())
    }

    /// Ask the daemon for its version (`GETINFO version`).
    pub async fn version(&self) -> Result<String, Error> {
        let output = self
            .enqueue(TorCmd::GetInfo {
                keys: vec!["version".to_owned()],
            })?
            .wait()
            .await?;
        let kv: HashMap<String, Option<String>> = match output {
            CmdOutput::KeyValues(kv) => kv.into_iter().collect(),
            _ => HashMap::new(),
        };
        kv.get("version")
            .and_then(|v| v.clone())
            .ok_or_else(|| Error::Resource {
                detail: "tor did not report a version".to_owned(),
            })
    }

    /// Tear the runtime down: stop the daemon and remove the runtime's
    /// own observers.
    pub async fn destroy(&self) {
        self.inner.destroy().await;
    }
}

impl std::fmt::Debug for TorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorRuntime")
            .field("fid", &self.inner.fid())
            .field("state", &self.state())
            .finish_non_exhaustive()
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
    use crate::env::ExplicitResources;
    use crate::err::ErrorKind;
    use assert_matches::assert_matches;

    fn runtime_over(dir: &tempfile::TempDir, tor: &str) -> TorRuntime {
        let env = Environment::builder(
            dir.path().join("work"),
            dir.path().join("cache"),
            Arc::new(ExplicitResources::new(tor)),
        )
        .build();
        TorRuntime::builder(env).build()
    }

    #[tokio::test]
    async fn start_with_missing_binary_fails_and_settles_off() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_over(&dir, "/nonexistent/tor-binary");
        let err = rt.start().wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Process);
        assert_eq!(rt.state().daemon, TorDaemonState::Off);
        assert_eq!(rt.state().network, NetworkState::Disabled);
        rt.destroy().await;
    }

    #[tokio::test]
    async fn stop_when_off_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_over(&dir, "/usr/bin/true");
        rt.stop().wait().await.unwrap();
        assert_eq!(rt.state().daemon, TorDaemonState::Off);
        rt.destroy().await;
    }

    #[tokio::test]
    async fn enqueue_without_daemon_fails() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_over(&dir, "/usr/bin/true");
        let err = rt.enqueue(TorCmd::DropGuards).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        rt.destroy().await;
    }

    #[tokio::test]
    async fn same_environment_joins_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let a = runtime_over(&dir, "/usr/bin/true");
        let b = runtime_over(&dir, "/usr/bin/true");
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert_eq!(a.environment().fid(), b.environment().fid());

        let other = tempfile::tempdir().unwrap();
        let c = runtime_over(&other, "/usr/bin/true");
        assert!(!Arc::ptr_eq(&a.inner, &c.inner));
        a.destroy().await;
        c.destroy().await;
    }

    #[tokio::test]
    async fn bootstrap_notices_drive_the_state_machine() {
        // S3, end to end through the bus: NOTICE bootstrap lines move
        // the daemon state to On(5), On(50), On(100) in order.
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_over(&dir, "/usr/bin/true");
        rt.inner.states.update_daemon(TorDaemonState::Starting);

        for (pct, line) in [
            (5_u8, "NOTICE Bootstrapped 5% (conn): Connecting to a relay"),
            (50, "NOTICE Bootstrapped 50% (loading_descriptors): Loading relay descriptors"),
            (100, "NOTICE Bootstrapped 100% (done): Done"),
        ] {
            let mut frames = Vec::new();
            let mut parser = tor_ctlproto::ReplyParser::new();
            parser
                .feed(format!("650 {line}\r\n").as_bytes(), &mut frames)
                .unwrap();
            assert_matches!(frames.pop(), Some(tor_ctlproto::Frame::Async(ev)) => {
                rt.inner.bus.publish(&RuntimeEvent::Tor(ev));
            });
            assert_eq!(
                rt.state().daemon,
                TorDaemonState::On { bootstrap: pct },
                "after {line}"
            );
        }
        rt.destroy().await;
    }

    #[tokio::test]
    async fn action_jobs_coalesce_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_over(&dir, "/nonexistent/tor-binary");
        let first = rt.start();
        let second = rt.start();
        // Both handles resolve (to the same failure), whether or not
        // the first finished before the second was enqueued.
        assert!(first.wait().await.is_err());
        assert!(second.wait().await.is_err());
        rt.destroy().await;
    }

    #[tokio::test]
    async fn cancelled_start_reports_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_over(&dir, "/nonexistent/tor-binary");
        let job = rt.start();
        job.cancel();
        // Either the cancel flag won the race (Cancelled) or the spawn
        // failure did (Process); both settle the state at Off.
        let err = job.wait().await.unwrap_err();
        assert_matches!(err.kind(), ErrorKind::Cancelled | ErrorKind::Process);
        assert_eq!(rt.state().daemon, TorDaemonState::Off);
        rt.destroy().await;
    }
}
