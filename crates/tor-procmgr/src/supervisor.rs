//! Spawning, watching, and stopping the tor process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fs_mistrust::Mistrust;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use tor_ctladdr::ConnectPoint;
use tor_ctlevents::{
    EventBus, LifecycleEvent, LifecyclePhase, LogEvent, LogLevel, RuntimeEvent,
};

use crate::err::ProcError;
use crate::feed::{FeedStatus, StartupFeed};
use crate::portfile::{choose_endpoint, parse_ctrl_port_file};

/// Component name in lifecycle events.
const COMPONENT: &str = "supervisor";

/// Minimum time between one process exiting and the next spawning.
const MIN_INTERSTART_GAP: Duration = Duration::from_millis(500);

/// Slice size while waiting out the gap, so callers can cancel.
const GAP_SLICE: Duration = Duration::from_millis(100);

/// How long the control-port file may take to appear.
const CTRL_FILE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the cookie file may take to appear.
const COOKIE_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval for both files.
const FILE_POLL: Duration = Duration::from_millis(50);

/// Everything needed to spawn one tor process.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SpawnConfig {
    /// The tor executable.
    pub tor_path: PathBuf,
    /// Arguments (not including the executable).
    pub argv: Vec<String>,
    /// Extra environment entries forwarded to the process.
    pub env: HashMap<String, String>,
    /// Directories to create with owner-only permissions before spawn.
    pub dirs: Vec<PathBuf>,
    /// Where tor advertises its control listener(s).
    pub ctrl_port_file: PathBuf,
    /// Where tor writes the authentication cookie, if cookie auth is
    /// configured.
    pub cookie_auth_file: Option<PathBuf>,
    /// How long to wait for the ready marker.
    pub ready_timeout: Duration,
}

impl SpawnConfig {
    /// Construct with defaults for the tunables.
    pub fn new(tor_path: impl Into<PathBuf>, argv: Vec<String>, ctrl_port_file: PathBuf) -> Self {
        SpawnConfig {
            tor_path: tor_path.into(),
            argv,
            env: HashMap::new(),
            dirs: Vec::new(),
            ctrl_port_file,
            cookie_auth_file: None,
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// The shared record of when a process last stopped, enforcing the
/// minimum inter-start gap across supervisor instances.
#[derive(Debug, Default)]
pub struct StopMark {
    /// When a process last exited.
    last_stop: Mutex<Option<Instant>>,
}

impl StopMark {
    /// A mark with no stop recorded.
    pub fn new() -> Arc<Self> {
        Arc::new(StopMark::default())
    }

    /// Record that a process just stopped.
    pub fn record(&self) {
        *self.last_stop.lock().expect("stop mark poisoned") = Some(Instant::now());
    }

    /// Time still to wait before the next spawn, if any.
    fn remaining(&self) -> Option<Duration> {
        let last = (*self.last_stop.lock().expect("stop mark poisoned"))?;
        MIN_INTERSTART_GAP.checked_sub(last.elapsed())
    }

    /// Wait out the remainder of the gap, yielding every slice so the
    /// caller can cancel mid-wait.
    pub async fn await_gap(&self) {
        while let Some(remaining) = self.remaining() {
            trace!("inter-start gap: {:?} remaining", remaining);
            tokio::time::sleep(remaining.min(GAP_SLICE)).await;
        }
    }
}

/// What a successful start hands back.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RunningProcess {
    /// The control endpoint to connect to.
    pub endpoint: ConnectPoint,
    /// The cookie bytes for `AUTHENTICATE`, when cookie auth is in use
    /// and the file appeared in time.
    pub auth_cookie: Option<Vec<u8>>,
}

/// A supervisor for one tor process.
#[derive(Debug)]
pub struct Supervisor {
    /// Instance correlation key.
    fid: String,
    /// Where stdio lines and lifecycle events are published.
    bus: Arc<EventBus>,
    /// The shared inter-start gap record.
    stop_mark: Arc<StopMark>,
    /// The spawn recipe.
    cfg: SpawnConfig,
    /// The startup verdict parser.
    feed: Arc<StartupFeed>,
    /// The child's PID once spawned.
    pid: Mutex<Option<u32>>,
    /// Tells the waiter task to hard-kill the child.
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Becomes true when the child has exited.
    exited: (watch::Sender<bool>, watch::Receiver<bool>),
    /// Teardown latch.
    destroyed: AtomicBool,
}

impl Supervisor {
    /// Construct a supervisor; nothing is spawned yet.
    pub fn new(
        cfg: SpawnConfig,
        bus: Arc<EventBus>,
        stop_mark: Arc<StopMark>,
        fid: impl Into<String>,
    ) -> Self {
        let fid = fid.into();
        bus.publish(&RuntimeEvent::Lifecycle(LifecycleEvent::new(
            LifecyclePhase::OnCreate,
            COMPONENT,
            fid.clone(),
        )));
        Supervisor {
            fid,
            bus,
            stop_mark,
            cfg,
            feed: Arc::new(StartupFeed::new()),
            pid: Mutex::new(None),
            kill_tx: Mutex::new(None),
            exited: watch::channel(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// The startup feed (for tests and diagnostics).
    pub fn feed(&self) -> &Arc<StartupFeed> {
        &self.feed
    }

    /// Spawn tor and drive it to readiness.
    ///
    /// Waits out the inter-start gap, secures the configured
    /// directories, spawns with null stdin and piped stdout/stderr,
    /// waits for the control-listener-ready marker, reads the
    /// control-port file, and collects the cookie.
    pub async fn start(&self) -> Result<RunningProcess, ProcError> {
        self.stop_mark.await_gap().await;

        for dir in &self.cfg.dirs {
            // Permissions are enforced on the directory itself; the
            // ancestry outside our work area is the caller's business.
            let mut builder = Mistrust::builder();
            if let Some(parent) = dir.parent() {
                builder.ignore_prefix(parent);
            }
            let mistrust = builder
                .build()
                .expect("could not construct a Mistrust");
            mistrust.make_directory(dir)?;
        }

        debug!(
            "[{}] spawning {} with {} args",
            self.fid,
            self.cfg.tor_path.display(),
            self.cfg.argv.len()
        );
        let mut child = Command::new(&self.cfg.tor_path)
            .args(&self.cfg.argv)
            .envs(&self.cfg.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        *self.pid.lock().expect("supervisor poisoned") = child.id();

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        tokio::spawn(stdio_reader(
            stdout,
            Arc::clone(&self.feed),
            Arc::clone(&self.bus),
            false,
        ));
        tokio::spawn(stdio_reader(
            stderr,
            Arc::clone(&self.feed),
            Arc::clone(&self.bus),
            true,
        ));

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.kill_tx.lock().expect("supervisor poisoned") = Some(kill_tx);
        tokio::spawn(process_waiter(
            child,
            kill_rx,
            Arc::clone(&self.feed),
            Arc::clone(&self.stop_mark),
            self.exited.0.clone(),
            self.fid.clone(),
        ));

        self.await_ready().await?;
        let endpoint = self.await_ctrl_port_file().await?;
        let auth_cookie = self.await_cookie().await;

        info!("[{}] tor is up at {}", self.fid, endpoint);
        self.bus
            .publish(&RuntimeEvent::Lifecycle(LifecycleEvent::new(
                LifecyclePhase::OnStart,
                COMPONENT,
                self.fid.clone(),
            )));
        Ok(RunningProcess {
            endpoint,
            auth_cookie,
        })
    }

    /// Wait for the feed's verdict, bounded by the ready timeout.
    async fn await_ready(&self) -> Result<(), ProcError> {
        let mut rx = self.feed.watch();
        let deadline = tokio::time::sleep(self.cfg.ready_timeout);
        tokio::pin!(deadline);
        loop {
            match self.feed.status() {
                FeedStatus::Ready => return Ok(()),
                FeedStatus::Failed(e) => return Err(e.into()),
                FeedStatus::Waiting => {}
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Feed sender gone; the next status() settles it.
                        continue;
                    }
                }
                () = &mut deadline => {
                    self.feed
                        .observe_timeout(self.cfg.ready_timeout.as_secs());
                    // The feed now holds the timeout verdict (or a
                    // racing real verdict, which wins).
                    continue;
                }
            }
        }
    }

    /// Poll the control-port file until it yields an endpoint.
    async fn await_ctrl_port_file(&self) -> Result<ConnectPoint, ProcError> {
        let deadline = Instant::now() + CTRL_FILE_TIMEOUT;
        loop {
            if let Ok(text) = tokio::fs::read_to_string(&self.cfg.ctrl_port_file).await {
                let endpoints = parse_ctrl_port_file(&text)?;
                if let Some(ep) = choose_endpoint(&endpoints, |p| p.exists()) {
                    return Ok(ep);
                }
            }
            if Instant::now() >= deadline {
                return Err(ProcError::CtrlPortFile {
                    detail: format!(
                        "no usable endpoint within {:?} at {}",
                        CTRL_FILE_TIMEOUT,
                        self.cfg.ctrl_port_file.display()
                    ),
                });
            }
            tokio::time::sleep(FILE_POLL).await;
        }
    }

    /// Poll the cookie file briefly; absence means authenticating with
    /// no credentials.
    async fn await_cookie(&self) -> Option<Vec<u8>> {
        let path = self.cfg.cookie_auth_file.as_ref()?;
        let deadline = Instant::now() + COOKIE_TIMEOUT;
        loop {
            match tokio::fs::read(path).await {
                Ok(bytes) if !bytes.is_empty() => return Some(bytes),
                _ => {}
            }
            if Instant::now() >= deadline {
                warn!(
                    "[{}] cookie file {} never appeared; authenticating without it",
                    self.fid,
                    path.display()
                );
                return None;
            }
            tokio::time::sleep(FILE_POLL).await;
        }
    }

    /// Stop the process: SIGTERM, await exit with a short grace for the
    /// stdout tail, record the stop mark.  Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pid = *self.pid.lock().expect("supervisor poisoned");
        if let Some(pid) = pid {
            #[cfg(unix)]
            {
                debug!("[{}] sending SIGTERM to {}", self.fid, pid);
                // Safety: sending a signal to a PID we spawned.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
            #[cfg(not(unix))]
            {
                debug!("[{}] requesting kill of {}", self.fid, pid);
                if let Some(tx) = self.kill_tx.lock().expect("supervisor poisoned").take() {
                    let _ = tx.send(());
                }
            }

            let mut exited = self.exited.1.clone();
            let graceful = tokio::time::timeout(Duration::from_secs(5), async {
                while !*exited.borrow() {
                    if exited.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;
            if graceful.is_err() {
                warn!("[{}] process ignored SIGTERM; killing", self.fid);
                if let Some(tx) = self.kill_tx.lock().expect("supervisor poisoned").take() {
                    let _ = tx.send(());
                }
                let mut exited = self.exited.1.clone();
                let _ = tokio::time::timeout(Duration::from_secs(5), async {
                    while !*exited.borrow() {
                        if exited.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await;
            }
            // A beat for the stdio readers to drain the tail.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.stop_mark.record();
        self.bus
            .publish(&RuntimeEvent::Lifecycle(LifecycleEvent::new(
                LifecyclePhase::OnStop,
                COMPONENT,
                self.fid.clone(),
            )));
        self.bus
            .publish(&RuntimeEvent::Lifecycle(LifecycleEvent::new(
                LifecyclePhase::OnDestroy,
                COMPONENT,
                self.fid.clone(),
            )));
    }
}

/// Start tor, retrying once on the known zombie-spawn behavior: the
/// first attempt times out having produced no stdout at all.
pub async fn start_with_zombie_retry(
    cfg: SpawnConfig,
    bus: Arc<EventBus>,
    stop_mark: Arc<StopMark>,
    fid: impl Into<String>,
) -> Result<(Supervisor, RunningProcess), ProcError> {
    let fid = fid.into();
    let supervisor = Supervisor::new(cfg.clone(), Arc::clone(&bus), Arc::clone(&stop_mark), fid.clone());
    match supervisor.start().await {
        Ok(running) => Ok((supervisor, running)),
        Err(ProcError::Start(e)) if e.looks_like_zombie() => {
            warn!("[{}] {}", fid, e);
            bus.publish(&RuntimeEvent::Log(LogEvent::new(
                LogLevel::Warn,
                "ZOMBIE PROCESS! Retrying...",
            )));
            supervisor.destroy().await;
            let retry = Supervisor::new(cfg, bus, stop_mark, fid);
            match retry.start().await {
                Ok(running) => Ok((retry, running)),
                Err(e) => {
                    retry.destroy().await;
                    Err(e)
                }
            }
        }
        Err(e) => {
            supervisor.destroy().await;
            Err(e)
        }
    }
}

/// Read one stdio stream line by line, feeding the startup parser and
/// publishing each line as a log event.
async fn stdio_reader<R>(
    stream: R,
    feed: Arc<StartupFeed>,
    bus: Arc<EventBus>,
    is_stderr: bool,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if is_stderr {
                    feed.observe_stderr(&line);
                } else {
                    feed.observe_stdout(&line);
                }
                bus.publish(&RuntimeEvent::Log(LogEvent::new(
                    classify_line(&line),
                    line,
                )));
            }
            Ok(None) => {
                if !is_stderr {
                    feed.observe_eof();
                }
                return;
            }
            Err(_) => {
                if !is_stderr {
                    feed.observe_eof();
                }
                return;
            }
        }
    }
}

/// Map tor's own severity tag to a log level.
fn classify_line(line: &str) -> LogLevel {
    let lower = line.to_ascii_lowercase();
    if lower.contains("[err]") {
        LogLevel::Error
    } else if lower.contains("[warn]") {
        LogLevel::Warn
    } else if lower.contains("[debug]") {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

/// Own the child: await its exit (or a hard-kill request), record the
/// exit for the feed and the stop mark.
async fn process_waiter(
    mut child: tokio::process::Child,
    kill_rx: oneshot::Receiver<()>,
    feed: Arc<StartupFeed>,
    stop_mark: Arc<StopMark>,
    exited: watch::Sender<bool>,
    fid: String,
) {
    tokio::pin!(kill_rx);
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let code = status.as_ref().ok().and_then(|s| s.code());
    debug!("[{}] tor exited with {:?}", fid, code);
    feed.observe_exit(code);
    stop_mark.record();
    let _ = exited.send(true);
}
