//! Job lifecycle: the handle callers hold for each enqueued command.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::channel::oneshot;

use tor_ctlevents::Collector;
use tor_ctlproto::CmdOutput;

use crate::err::ConnError;

/// The outcome type jobs resolve to.
pub(crate) type JobOutcome = Result<CmdOutput, ConnError>;

/// A completion callback.
type CompletionFn = Box<dyn FnOnce(&JobOutcome) + Send>;

/// Where a job is in its life.
///
/// Transitions are monotonic: once a terminal state (`Success`,
/// `Error`, `Cancelled`) is reached, nothing changes it, and the
/// completion callbacks have fired exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum JobState {
    /// Waiting in the queue.
    Enqueued,
    /// The processor has picked it up.
    Executing,
    /// Completed with a success value.
    Success,
    /// Completed with an error.
    Error,
    /// Terminated without executing to completion.
    Cancelled,
}

impl JobState {
    /// True once the job can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::Error | JobState::Cancelled
        )
    }
}

/// The mutable half of a job, behind its lock.
struct JobCell {
    /// Current state.
    state: JobState,
    /// The waiter, until the job completes.
    waiter: Option<oneshot::Sender<JobOutcome>>,
    /// Completion callbacks; slots are `None` once disposed.
    completions: Vec<Option<CompletionFn>>,
    /// The final outcome, kept for callbacks registered after
    /// completion.
    outcome: Option<JobOutcome>,
}

/// Shared state between the handle, the queue, and the processor.
pub(crate) struct JobInner {
    /// The command keyword, for attribution.
    name: &'static str,
    /// The lock around the state machine.
    cell: Mutex<JobCell>,
    /// Set when a caller cancelled while the job was executing; the
    /// processor uses it to discard the wire result.
    cancel_requested: AtomicBool,
}

impl JobInner {
    /// Create a job in `Enqueued`, returning the shared half and the
    /// waiter's receiving end.
    pub(crate) fn new(name: &'static str) -> (Arc<JobInner>, oneshot::Receiver<JobOutcome>) {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::new(JobInner {
            name,
            cell: Mutex::new(JobCell {
                state: JobState::Enqueued,
                waiter: Some(tx),
                completions: Vec::new(),
                outcome: None,
            }),
            cancel_requested: AtomicBool::new(false),
        });
        (inner, rx)
    }

    /// The command keyword.
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Current state.
    pub(crate) fn state(&self) -> JobState {
        self.cell.lock().expect("job poisoned").state
    }

    /// True if a cancel arrived while executing.
    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Move `Enqueued` → `Executing`.  Fails if the job was cancelled
    /// (or otherwise completed) in the meantime.
    pub(crate) fn try_executing(&self) -> bool {
        let mut cell = self.cell.lock().expect("job poisoned");
        if cell.state == JobState::Enqueued {
            cell.state = JobState::Executing;
            true
        } else {
            false
        }
    }

    /// Complete the job, resolving the waiter and firing callbacks on
    /// this thread.  Returns false when the job was already terminal
    /// (the outcome is discarded).  Callback panics go into `errors`.
    pub(crate) fn complete(&self, outcome: JobOutcome, errors: &mut Collector) -> bool {
        let (waiter, completions) = {
            let mut cell = self.cell.lock().expect("job poisoned");
            if cell.state.is_terminal() {
                return false;
            }
            cell.state = match &outcome {
                Ok(_) => JobState::Success,
                Err(e) if e.is_cancellation() => JobState::Cancelled,
                Err(_) => JobState::Error,
            };
            cell.outcome = Some(outcome.clone());
            (
                cell.waiter.take(),
                std::mem::take(&mut cell.completions),
            )
        };
        if let Some(waiter) = waiter {
            // The handle may have been dropped without awaiting.
            let _ = waiter.send(outcome.clone());
        }
        for cb in completions.into_iter().flatten() {
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&outcome)))
            {
                errors.push("job completion", describe_panic(self.name, &panic));
            }
        }
        true
    }

    /// Request cancellation.
    ///
    /// An `Enqueued` job terminates right away; an `Executing` job's
    /// waiter resolves now while the wire command runs to completion
    /// and its result is discarded.
    pub(crate) fn cancel(&self, reason: ConnError, errors: &mut Collector) {
        if self.state() == JobState::Executing {
            self.cancel_requested.store(true, Ordering::SeqCst);
        }
        self.complete(Err(reason), errors);
    }
}

/// Render a completion-callback panic for the uncaught handler.
fn describe_panic(name: &str, panic: &(dyn std::any::Any + Send)) -> String {
    let what = if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "panic"
    };
    format!("{name} completion callback panicked: {what}")
}

/// A caller's handle to one enqueued command.
pub struct JobHandle {
    /// The shared job.
    inner: Arc<JobInner>,
    /// The waiter.
    receiver: oneshot::Receiver<JobOutcome>,
    /// Where cancellation-time callback panics are routed.
    handler: tor_ctlevents::UncaughtHandler,
}

impl JobHandle {
    /// Wrap the pieces into a handle.
    pub(crate) fn new(
        inner: Arc<JobInner>,
        receiver: oneshot::Receiver<JobOutcome>,
        handler: tor_ctlevents::UncaughtHandler,
    ) -> Self {
        JobHandle {
            inner,
            receiver,
            handler,
        }
    }

    /// The command keyword this job carries.
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// The job's current state.
    pub fn state(&self) -> JobState {
        self.inner.state()
    }

    /// Cancel the job.
    ///
    /// Enqueued jobs terminate immediately; an executing job's waiter
    /// resolves with [`ConnError::Cancelled`] and the wire result is
    /// discarded when it arrives.  Idempotent.
    pub fn cancel(&self) {
        let mut errors = Collector::default();
        self.inner.cancel(ConnError::Cancelled, &mut errors);
        errors.surface(&self.handler);
    }

    /// Register a callback to run when the job completes.
    ///
    /// Fires exactly once, on the thread that completes the job, or
    /// immediately on this thread when the job is already terminal.
    /// The returned handle can dispose the registration before it fires.
    pub fn invoke_on_completion<F>(&self, cb: F) -> CompletionHandle
    where
        F: FnOnce(&Result<CmdOutput, ConnError>) + Send + 'static,
    {
        let mut cell = self.inner.cell.lock().expect("job poisoned");
        if cell.state.is_terminal() {
            let outcome = cell
                .outcome
                .clone()
                .unwrap_or(Err(ConnError::Interrupted));
            drop(cell);
            cb(&outcome);
            return CompletionHandle {
                job: Weak::new(),
                index: 0,
            };
        }
        let index = cell.completions.len();
        cell.completions.push(Some(Box::new(cb)));
        CompletionHandle {
            job: Arc::downgrade(&self.inner),
            index,
        }
    }

    /// Await the job's outcome.
    pub async fn wait(self) -> Result<CmdOutput, ConnError> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            // The sender side only disappears if the queue was dropped
            // without completing the job.
            Err(_) => Err(ConnError::Interrupted),
        }
    }

}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Disposes one completion-callback registration.
pub struct CompletionHandle {
    /// The job the callback was registered on.
    job: Weak<JobInner>,
    /// The callback's slot.
    index: usize,
}

impl CompletionHandle {
    /// Remove the callback if it has not fired yet.
    pub fn dispose(self) {
        if let Some(job) = self.job.upgrade() {
            let mut cell = job.cell.lock().expect("job poisoned");
            if let Some(slot) = cell.completions.get_mut(self.index) {
                *slot = None;
            }
        }
    }
}
