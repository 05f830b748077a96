//! High-level actions: Start, Stop, Restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::debug;

use crate::err::Error;
use crate::runtime::RtInner;

/// The actions a runtime can be asked to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Action {
    /// Spawn and connect a daemon.
    Start,
    /// Shut the daemon down.
    Stop,
    /// Stop, then start, as one job.
    Restart,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::Start => "Start",
            Action::Stop => "Stop",
            Action::Restart => "Restart",
        };
        write!(f, "{}", name)
    }
}

/// The future type an action job shares between awaiters.
type SharedResult = Shared<BoxFuture<'static, Result<(), Error>>>;

/// A handle to one in-flight (or finished) action.
///
/// Cloneable and awaitable from several places; enqueueing the same
/// action kind while one is running returns the running job.
#[derive(Clone)]
pub struct ActionJob {
    /// Which action this is.
    action: Action,
    /// Cancellation flag for this job (skips the restart's second leg).
    interrupt: Arc<AtomicBool>,
    /// The runtime's start-interruption flag, shared so cancelling a
    /// start (or restart) interrupts an in-flight startup.
    interrupt_start: Arc<AtomicBool>,
    /// The shared outcome.
    fut: SharedResult,
}

impl ActionJob {
    /// Which action this job performs.
    pub fn action(&self) -> Action {
        self.action
    }

    /// True once the action has finished (either way).
    pub fn is_finished(&self) -> bool {
        self.fut.peek().is_some()
    }

    /// Await the action's outcome.  May be awaited by any number of
    /// holders.
    pub async fn wait(&self) -> Result<(), Error> {
        self.fut.clone().await
    }

    /// Request cancellation.
    ///
    /// A `Start` (or the start leg of a `Restart`) is interrupted
    /// cooperatively: whatever was created is torn down and the state
    /// settles at `Off`.  A `Stop` is never abandoned; it runs to
    /// completion on its detached task regardless.
    pub fn cancel(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        if self.action != Action::Stop {
            self.interrupt_start.store(true, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for ActionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionJob")
            .field("action", &self.action)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// The per-runtime action bookkeeping: the last job per action kind.
#[derive(Default)]
pub(crate) struct ActionSlots {
    /// Last job per kind; a running one coalesces new requests.
    slots: Mutex<HashMap<Action, ActionJob>>,
}

/// Enqueue `action` on `rt`, coalescing with a running job of the same
/// kind.
///
/// The action body runs on a detached task, so dropping (or
/// cancelling) the returned job never leaves the runtime in a
/// half-transitioned state: a stop always completes, and a cancelled
/// start completes its own teardown.
pub(crate) fn enqueue_action(rt: &Arc<RtInner>, action: Action) -> ActionJob {
    let mut slots = rt.actions().slots.lock().expect("actions poisoned");
    if let Some(existing) = slots.get(&action) {
        if !existing.is_finished() {
            debug!("[{}] coalescing {} with the running job", rt.fid(), action);
            return existing.clone();
        }
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    let (tx, rx) = futures::channel::oneshot::channel();
    let body_rt = Arc::clone(rt);
    let body_interrupt = Arc::clone(&interrupt);
    tokio::spawn(async move {
        let result = match action {
            Action::Start => body_rt.start_instance().await,
            Action::Stop => body_rt.stop_instance().await,
            Action::Restart => {
                let stopped = body_rt.stop_instance().await;
                match stopped {
                    Ok(()) if !body_interrupt.load(Ordering::SeqCst) => {
                        body_rt.start_instance().await
                    }
                    Ok(()) => Err(Error::Cancelled),
                    Err(e) => Err(e),
                }
            }
        };
        let _ = tx.send(result);
    });
    let fut: SharedResult = async move { rx.await.unwrap_or(Err(Error::Cancelled)) }
        .boxed()
        .shared();
    let job = ActionJob {
        action,
        interrupt,
        interrupt_start: rt.interrupt_start_flag(),
        fut,
    };
    slots.insert(action, job.clone());
    job
}
