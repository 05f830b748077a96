//! The control connection: socket ownership, reader task, routing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use tor_ctladdr::ConnectPoint;
use tor_ctlevents::{EventBus, RuntimeEvent, UncaughtHandler};
use tor_ctlproto::{CmdOutput, Frame, ProtocolError, Reply, ReplyParser, TorCmd};

use crate::err::ConnError;
use crate::job::JobHandle;
use crate::queue::{CmdExecutor, CmdQueue};

/// Where a connection is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnState {
    /// Socket opened; nothing sent yet.
    Connecting,
    /// The authentication command is in flight.
    Authenticating,
    /// Authenticated and processing commands.
    Ready,
    /// Teardown has begun.
    Destroying,
    /// Teardown finished.
    Destroyed,
}

/// The byte stream a connection runs over.
trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// Shared connection state.
struct ConnInner {
    /// Instance correlation key.
    fid: String,
    /// Where `6xx` frames are published.
    bus: Arc<EventBus>,
    /// Lifecycle state.
    state: Mutex<ConnState>,
    /// The command queue.
    queue: CmdQueue,
    /// True while the processor awaits a synchronous reply.
    waiting: Arc<AtomicBool>,
    /// Sender half of the reply channel; the reader resolves the
    /// in-flight command through it.
    reply_tx: mpsc::UnboundedSender<Result<Reply, ConnError>>,
    /// Write half, shut down at destroy to unblock the reader.
    writer: Arc<tokio::sync::Mutex<WriteHalf<Box<dyn IoStream>>>>,
    /// The reader task, aborted on external destroy.
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Teardown latch.
    destroyed: AtomicBool,
}

impl ConnInner {
    /// Current state.
    fn state(&self) -> ConnState {
        *self.state.lock().expect("conn poisoned")
    }

    /// Set the state.
    fn set_state(&self, state: ConnState) {
        *self.state.lock().expect("conn poisoned") = state;
    }

    /// Tear the connection down.
    ///
    /// `inflight` resolves whatever command is awaiting its reply;
    /// `queued` fails everything still in the queue.  Idempotent; all
    /// teardown failures are collected and surfaced once through the
    /// uncaught handler.
    fn teardown(&self, inflight: ConnError, queued: &ConnError) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("[{}] control connection tearing down: {}", self.fid, inflight);
        self.set_state(ConnState::Destroying);
        // Resolve the in-flight waiter (a no-op if nothing is waiting;
        // the executor drains stale entries before each command).
        let _ = self.reply_tx.send(Err(inflight));
        self.queue.cancel_all(queued);
        self.queue.destroy();
        self.set_state(ConnState::Destroyed);
    }
}

/// The queue's executor: writes the wire form, awaits the routed reply.
struct ConnExecutor {
    /// Write half of the socket.
    writer: Arc<tokio::sync::Mutex<WriteHalf<Box<dyn IoStream>>>>,
    /// Receive side of the reply channel.
    replies: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Reply, ConnError>>>,
    /// Set while awaiting a reply; the reader treats a synchronous
    /// frame arriving outside this window as a protocol violation.
    waiting: Arc<AtomicBool>,
}

#[async_trait]
impl CmdExecutor for ConnExecutor {
    async fn execute(&self, cmd: &TorCmd) -> Result<Reply, ConnError> {
        let wire = cmd.render()?;
        let mut replies = self.replies.lock().await;
        // Drop any stale teardown notice from a previous command.
        while let Ok(stale) = replies.try_recv() {
            if let Err(e) = stale {
                return Err(e);
            }
        }
        self.waiting.store(true, Ordering::SeqCst);
        let result = async {
            {
                let mut w = self.writer.lock().await;
                w.write_all(wire.as_bytes()).await?;
                w.flush().await?;
            }
            match replies.recv().await {
                Some(result) => result,
                None => Err(ConnError::ConnectionClosed),
            }
        }
        .await;
        self.waiting.store(false, Ordering::SeqCst);
        result
    }
}

/// A live control connection.
///
/// Owns the socket: a reader task feeds the reply parser and routes
/// frames (async events to the bus, everything else to the in-flight
/// command), while the queue's processor writes commands and awaits
/// their replies.
pub struct ControlConn {
    /// Shared state.
    inner: Arc<ConnInner>,
}

impl ControlConn {
    /// Open a connection to `endpoint`.
    pub async fn connect(
        endpoint: &ConnectPoint,
        bus: Arc<EventBus>,
        handler: UncaughtHandler,
        fid: impl Into<String>,
    ) -> Result<ControlConn, ConnError> {
        let stream: Box<dyn IoStream> = match endpoint {
            ConnectPoint::Tcp(addr) => Box::new(tokio::net::TcpStream::connect(addr).await?),
            #[cfg(unix)]
            ConnectPoint::Unix(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
            #[cfg(not(unix))]
            ConnectPoint::Unix(_) => {
                return Err(ConnError::Unsupported(
                    "AF_UNIX control endpoints need a unix host",
                ))
            }
            #[allow(unreachable_patterns)]
            _ => return Err(ConnError::Unsupported("unrecognized endpoint kind")),
        };
        Ok(Self::from_stream(stream, bus, handler, fid).await)
    }

    /// Build a connection over an already-open stream.
    ///
    /// Returns once the reader task is installed and consuming, so the
    /// first frame tor sends cannot be missed.
    pub async fn from_stream<S>(
        stream: S,
        bus: Arc<EventBus>,
        handler: UncaughtHandler,
        fid: impl Into<String>,
    ) -> ControlConn
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let fid = fid.into();
        let boxed: Box<dyn IoStream> = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);
        let writer = Arc::new(tokio::sync::Mutex::new(write_half));
        let waiting = Arc::new(AtomicBool::new(false));
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let executor = Arc::new(ConnExecutor {
            writer: Arc::clone(&writer),
            replies: tokio::sync::Mutex::new(reply_rx),
            waiting: Arc::clone(&waiting),
        });
        let queue = CmdQueue::new(fid.clone(), executor, handler);

        let inner = Arc::new(ConnInner {
            fid,
            bus,
            state: Mutex::new(ConnState::Connecting),
            queue,
            waiting,
            reply_tx,
            writer,
            reader: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let reader_inner = Arc::clone(&inner);
        let reader = tokio::spawn(async move {
            reader_loop(reader_inner, read_half, started_tx).await;
        });
        *inner.reader.lock().expect("conn poisoned") = Some(reader);
        // Wait for the reader to be consuming before handing the
        // connection out.
        let _ = started_rx.await;

        ControlConn { inner }
    }

    /// The connection's lifecycle state.
    pub fn state(&self) -> ConnState {
        self.inner.state()
    }

    /// The event bus this connection publishes to.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// The command queue (interceptor registration, processor stats).
    pub fn queue(&self) -> &CmdQueue {
        &self.inner.queue
    }

    /// Issue the authentication command.  Must be the first command;
    /// failure destroys the connection.
    pub async fn authenticate(&self, cmd: TorCmd) -> Result<CmdOutput, ConnError> {
        self.inner.set_state(ConnState::Authenticating);
        match self.inner.queue.enqueue(cmd).wait().await {
            Ok(output) => {
                self.inner.set_state(ConnState::Ready);
                Ok(output)
            }
            Err(e) => {
                warn!("[{}] authentication failed: {}", self.inner.fid, e);
                self.destroy();
                Err(e)
            }
        }
    }

    /// Enqueue `cmd`, returning its job handle.
    pub fn enqueue(&self, cmd: TorCmd) -> JobHandle {
        self.inner.queue.enqueue(cmd)
    }

    /// Destroy the connection: close the socket, cancel every
    /// outstanding job, fire each completion callback exactly once.
    /// Idempotent.
    pub fn destroy(&self) {
        self.inner
            .teardown(ConnError::ConnectionClosed, &ConnError::Interrupted);
        // Shut the socket down so tor sees the close, and stop the
        // reader if it is still parked on a read.
        let writer = Arc::clone(&self.inner.writer);
        let reader = self.inner.reader.lock().expect("conn poisoned").take();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = writer.lock().await.shutdown().await;
                if let Some(reader) = reader {
                    reader.abort();
                }
            });
        } else if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for ControlConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlConn")
            .field("fid", &self.inner.fid)
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}

/// The reader task: bytes to frames to routes.
async fn reader_loop(
    inner: Arc<ConnInner>,
    mut read_half: ReadHalf<Box<dyn IoStream>>,
    started: tokio::sync::oneshot::Sender<()>,
) {
    let mut parser = ReplyParser::new();
    let mut buf = vec![0_u8; 4096];
    let mut frames = Vec::new();
    let _ = started.send(());
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                trace!("[{}] control socket EOF", inner.fid);
                let inflight = match parser.finish() {
                    Ok(()) => ConnError::ConnectionClosed,
                    Err(e) => e.into(),
                };
                inner.teardown(inflight, &ConnError::Cancelled);
                return;
            }
            Ok(n) => {
                frames.clear();
                if let Err(e) = parser.feed(&buf[..n], &mut frames) {
                    inner.teardown(e.into(), &ConnError::Cancelled);
                    return;
                }
                for frame in frames.drain(..) {
                    match frame {
                        Frame::Async(event) => {
                            trace!("[{}] event: {}", inner.fid, event.keyword());
                            inner.bus.publish(&RuntimeEvent::Tor(event));
                        }
                        Frame::Sync(reply) => {
                            if !inner.waiting.load(Ordering::SeqCst) {
                                // A synchronous reply with nothing in
                                // flight: the stream is unusable.
                                inner.teardown(
                                    ProtocolError::UnsolicitedReply(reply.status()).into(),
                                    &ConnError::Cancelled,
                                );
                                return;
                            }
                            let _ = inner.reply_tx.send(Ok(reply));
                        }
                        _ => unreachable!("Frame is non-exhaustive but only has Sync/Async variants"),
                    }
                }
            }
            Err(e) => {
                inner.teardown(e.into(), &ConnError::Cancelled);
                return;
            }
        }
    }
}
