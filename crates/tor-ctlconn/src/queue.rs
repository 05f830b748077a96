//! The command queue: single-flight, ordered, cancellable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, trace};

use tor_ctlevents::{Collector, UncaughtHandler};
use tor_ctlproto::{CmdError, Reply, TorCmd};

use crate::err::ConnError;
use crate::job::{JobHandle, JobInner};

/// Something that can put one command on the wire and produce its
/// reply.  The connection implements this; tests script it.
#[async_trait]
pub trait CmdExecutor: Send + Sync {
    /// Execute `cmd`, returning its complete reply.
    async fn execute(&self, cmd: &TorCmd) -> Result<Reply, ConnError>;
}

/// An interceptor body: substitute (or refuse) a command before it is
/// rendered to the wire.
pub type InterceptFn = Box<dyn Fn(TorCmd) -> Result<TorCmd, CmdError> + Send + Sync>;

/// An interceptor registration.
struct Interceptor {
    /// The command keyword this interceptor applies to.
    keyword: &'static str,
    /// The substitution.
    intercept: InterceptFn,
}

/// One queued command.
struct Entry {
    /// The command, pre-interception.
    cmd: TorCmd,
    /// Its job.
    job: Arc<JobInner>,
}

/// The queue's mutable half.
#[derive(Default)]
struct QueueCell {
    /// Commands waiting to execute, in enqueue order.
    pending: VecDeque<Entry>,
    /// Jobs transferred out of `pending` by a stop signal; they become
    /// `Cancelled` when the processor next drains them.
    cancels: VecDeque<Entry>,
}

/// Shared queue state.
struct QueueInner {
    /// Instance correlation key, for logs.
    fid: String,
    /// Puts commands on the wire.
    executor: Arc<dyn CmdExecutor>,
    /// Where callback panics are routed.
    handler: UncaughtHandler,
    /// Runtime handle captured at construction, so enqueue works from
    /// any thread.
    rt: tokio::runtime::Handle,
    /// The queues.
    cell: Mutex<QueueCell>,
    /// Interceptors, copy-on-write so application happens lock-free.
    interceptors: Mutex<Arc<[Arc<Interceptor>]>>,
    /// Whether a processor task is currently looping.
    processor_running: AtomicBool,
    /// How many times a processor task has been started.
    processor_starts: AtomicUsize,
    /// Set once destroyed; new enqueues fail immediately.
    destroyed: AtomicBool,
}

/// A multi-producer, single-consumer command queue.
///
/// Guarantees: at most one command is executing at any time; commands
/// execute in enqueue order; enqueueing a stop signal (`SIGNAL HALT` or
/// `SIGNAL SHUTDOWN`) transfers everything still pending to a
/// cancellation queue, drained to `Cancelled` once the stop has
/// executed.
///
/// The processor task is started on demand: enqueueing when no
/// processor is looping starts one, and it exits when the queues drain.
/// Under bursty enqueue, many commands share one processor start; the
/// start count is observable via [`CmdQueue::processor_starts`].
#[derive(Clone)]
pub struct CmdQueue {
    /// Shared state.
    inner: Arc<QueueInner>,
}

impl CmdQueue {
    /// Construct a queue over `executor`.
    ///
    /// Must be called within a tokio runtime; the handle is captured
    /// for processor spawning.
    pub fn new(
        fid: impl Into<String>,
        executor: Arc<dyn CmdExecutor>,
        handler: UncaughtHandler,
    ) -> Self {
        CmdQueue {
            inner: Arc::new(QueueInner {
                fid: fid.into(),
                executor,
                handler,
                rt: tokio::runtime::Handle::current(),
                cell: Mutex::new(QueueCell::default()),
                interceptors: Mutex::new(Arc::from(Vec::new())),
                processor_running: AtomicBool::new(false),
                processor_starts: AtomicUsize::new(0),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Register an interceptor for commands with `keyword`.
    pub fn add_interceptor(&self, keyword: &'static str, intercept: InterceptFn) {
        let mut list = self.inner.interceptors.lock().expect("queue poisoned");
        let mut copy: Vec<Arc<Interceptor>> = list.iter().cloned().collect();
        copy.push(Arc::new(Interceptor { keyword, intercept }));
        *list = Arc::from(copy);
    }

    /// Append `cmd`, returning its job handle.
    ///
    /// On a destroyed queue the job fails immediately with
    /// [`ConnError::Interrupted`].
    pub fn enqueue(&self, cmd: TorCmd) -> JobHandle {
        let (job, rx) = JobInner::new(cmd.keyword());
        let handle = JobHandle::new(Arc::clone(&job), rx, Arc::clone(&self.inner.handler));

        if self.inner.destroyed.load(Ordering::SeqCst) {
            let mut errors = Collector::default();
            job.complete(Err(ConnError::Interrupted), &mut errors);
            errors.surface(&self.inner.handler);
            return handle;
        }

        {
            let mut cell = self.inner.cell.lock().expect("queue poisoned");
            if cmd.is_stop_signal() {
                // Everything enqueued before the stop gets cancelled;
                // the stop itself still runs.
                let transferred: Vec<Entry> = cell.pending.drain(..).collect();
                if !transferred.is_empty() {
                    debug!(
                        "[{}] stop signal cancels {} queued job(s)",
                        self.inner.fid,
                        transferred.len()
                    );
                }
                cell.cancels.extend(transferred);
            }
            cell.pending.push_back(Entry { cmd, job });
        }
        self.maybe_start_processor();
        handle
    }

    /// The number of processor-task starts so far.
    pub fn processor_starts(&self) -> usize {
        self.inner.processor_starts.load(Ordering::SeqCst)
    }

    /// Cancel everything queued, failing each job with `reason`, and
    /// refuse further enqueues when `reason` is `Interrupted`.
    ///
    /// All callback failures are collected and surfaced once.
    pub fn cancel_all(&self, reason: &ConnError) {
        let entries: Vec<Entry> = {
            let mut cell = self.inner.cell.lock().expect("queue poisoned");
            let cell = &mut *cell;
            cell.pending.drain(..).chain(cell.cancels.drain(..)).collect()
        };
        let mut errors = Collector::default();
        for entry in entries {
            entry.job.complete(Err(reason.clone()), &mut errors);
        }
        errors.surface(&self.inner.handler);
    }

    /// Destroy the queue: drain both queues, failing every job with
    /// [`ConnError::Interrupted`].  Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_all(&ConnError::Interrupted);
    }

    /// Start a processor task if none is looping.
    fn maybe_start_processor(&self) {
        if self
            .inner
            .processor_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.processor_starts.fetch_add(1, Ordering::SeqCst);
            trace!(
                "[{}] starting command processor (start #{})",
                self.inner.fid,
                self.processor_starts()
            );
            let inner = Arc::clone(&self.inner);
            self.inner.rt.spawn(async move {
                process_loop(inner).await;
            });
        }
    }
}

impl std::fmt::Debug for CmdQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cell = self.inner.cell.lock().expect("queue poisoned");
        f.debug_struct("CmdQueue")
            .field("fid", &self.inner.fid)
            .field("pending", &cell.pending.len())
            .field("cancels", &cell.cancels.len())
            .finish_non_exhaustive()
    }
}

/// What the processor pulled off the queues.
enum Work {
    /// Execute this command.
    Execute(Entry),
    /// Cancel this job; it was transferred out by a stop signal.
    Cancel(Entry),
}

/// The processor: loops until both queues are empty, then exits.
///
/// The cancellation queue is only reached once `pending` is empty, so a
/// stop signal (which sits in `pending`) executes before the jobs it
/// displaced are drained.
async fn process_loop(inner: Arc<QueueInner>) {
    loop {
        let work = {
            let mut cell = inner.cell.lock().expect("queue poisoned");
            match cell.pending.pop_front() {
                Some(e) => Some(Work::Execute(e)),
                None => cell.cancels.pop_front().map(Work::Cancel),
            }
        };
        match work {
            Some(Work::Execute(entry)) => execute_entry(&inner, entry).await,
            Some(Work::Cancel(entry)) => {
                let mut errors = Collector::default();
                entry.job.complete(Err(ConnError::Cancelled), &mut errors);
                errors.surface(&inner.handler);
            }
            None => {
                inner.processor_running.store(false, Ordering::SeqCst);
                // Re-check: an enqueue may have raced our shutdown and
                // seen the processor still "running".
                let nonempty = {
                    let cell = inner.cell.lock().expect("queue poisoned");
                    !cell.pending.is_empty() || !cell.cancels.is_empty()
                };
                if nonempty
                    && inner
                        .processor_running
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    continue;
                }
                return;
            }
        }
    }
}

/// Execute one entry end to end.
async fn execute_entry(inner: &Arc<QueueInner>, entry: Entry) {
    // A job cancelled while enqueued is already terminal; skip it.
    if !entry.job.try_executing() {
        trace!("[{}] skipping terminal job {}", inner.fid, entry.job.name());
        return;
    }

    let mut errors = Collector::default();

    // Interceptors: first match by keyword wins the right to
    // substitute; failures abort the job.
    let snapshot = {
        let list = inner.interceptors.lock().expect("queue poisoned");
        Arc::clone(&list)
    };
    let mut cmd = entry.cmd;
    for interceptor in snapshot.iter() {
        if interceptor.keyword != cmd.keyword() {
            continue;
        }
        match (interceptor.intercept)(cmd) {
            Ok(substituted) => cmd = substituted,
            Err(e) => {
                entry.job.complete(Err(e.into()), &mut errors);
                errors.surface(&inner.handler);
                return;
            }
        }
    }

    let outcome = match inner.executor.execute(&cmd).await {
        Ok(reply) => cmd.interpret(reply).map_err(ConnError::from),
        Err(e) => Err(e),
    };

    if entry.job.cancel_requested() {
        // The waiter has already resolved with Cancelled; the wire
        // result is discarded.
        trace!("[{}] discarding result of cancelled {}", inner.fid, cmd);
        return;
    }
    entry.job.complete(outcome, &mut errors);
    errors.surface(&inner.handler);
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
    use crate::job::JobState;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tor_ctlevents::default_uncaught_handler;
    use tor_ctlproto::{CmdOutput, ReplyLine, ReplyStatus, TorSignal};

    /// An executor that answers everything `250 OK`, recording order,
    /// optionally pausing on each command.
    struct ScriptedExecutor {
        executed: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedExecutor {
        fn new() -> Arc<Self> {
            Arc::new(ScriptedExecutor {
                executed: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(ScriptedExecutor {
                executed: Mutex::new(Vec::new()),
                delay: Some(delay),
            })
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CmdExecutor for ScriptedExecutor {
        async fn execute(&self, cmd: &TorCmd) -> Result<Reply, ConnError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.executed
                .lock()
                .unwrap()
                .push(cmd.render().map_err(ConnError::from)?.trim_end().to_owned());
            Ok(Reply::from_lines(vec![ReplyLine::new(ReplyStatus::OK, "OK")]))
        }
    }

    fn queue(executor: Arc<dyn CmdExecutor>) -> CmdQueue {
        CmdQueue::new("test0000", executor, default_uncaught_handler())
    }

    #[tokio::test]
    async fn commands_execute_in_enqueue_order() {
        let exec = ScriptedExecutor::new();
        let q = queue(exec.clone());
        let a = q.enqueue(TorCmd::Signal(TorSignal::Dump));
        let b = q.enqueue(TorCmd::Signal(TorSignal::Debug));
        let c = q.enqueue(TorCmd::DropGuards);
        assert_matches!(a.wait().await, Ok(CmdOutput::Ok));
        assert_matches!(b.wait().await, Ok(CmdOutput::Ok));
        assert_matches!(c.wait().await, Ok(CmdOutput::Ok));
        assert_eq!(
            exec.executed(),
            vec!["SIGNAL DUMP", "SIGNAL DEBUG", "DROPGUARDS"]
        );
    }

    #[tokio::test]
    async fn completion_order_follows_enqueue_order() {
        // An earlier command's callback fires before a later one executes.
        let exec = ScriptedExecutor::new();
        let q = queue(exec.clone());
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let a = q.enqueue(TorCmd::Signal(TorSignal::Dump));
        let order_a = Arc::clone(&order);
        a.invoke_on_completion(move |_| order_a.lock().unwrap().push("a-done"));

        let b = q.enqueue(TorCmd::Signal(TorSignal::Debug));
        let order_b = Arc::clone(&order);
        b.invoke_on_completion(move |_| order_b.lock().unwrap().push("b-done"));

        b.wait().await.unwrap();
        let order = order.lock().unwrap();
        assert_eq!(*order, vec!["a-done", "b-done"]);
    }

    #[tokio::test]
    async fn one_processor_start_for_a_burst() {
        let exec = ScriptedExecutor::slow(Duration::from_millis(5));
        let q = queue(exec.clone());
        let handles: Vec<_> = (0..10)
            .map(|_| q.enqueue(TorCmd::Signal(TorSignal::Dump)))
            .collect();
        for h in handles {
            h.wait().await.unwrap();
        }
        // The processor is (re)started on demand, never once per
        // command: bursty enqueue shares starts.
        assert!(q.processor_starts() < 10);
        assert!(q.processor_starts() >= 1);
    }

    #[tokio::test]
    async fn processor_restarts_after_drain() {
        let exec = ScriptedExecutor::new();
        let q = queue(exec.clone());
        q.enqueue(TorCmd::DropGuards).wait().await.unwrap();
        // Give the processor time to park.
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.enqueue(TorCmd::DropGuards).wait().await.unwrap();
        assert_eq!(q.processor_starts(), 2);
    }

    #[tokio::test]
    async fn stop_signal_cancels_queued_jobs() {
        // Five dumps then a halt; the halt succeeds, every dump
        // fails with Cancelled.
        let exec = ScriptedExecutor::slow(Duration::from_millis(10));
        let q = queue(exec.clone());

        // Occupy the processor so the dumps stay enqueued.
        let first = q.enqueue(TorCmd::Signal(TorSignal::Heartbeat));
        let dumps: Vec<_> = (0..5)
            .map(|_| q.enqueue(TorCmd::Signal(TorSignal::Dump)))
            .collect();
        let halt = q.enqueue(TorCmd::Signal(TorSignal::Halt));

        first.wait().await.unwrap();
        assert_matches!(halt.wait().await, Ok(CmdOutput::Ok));
        for dump in dumps {
            assert_matches!(dump.wait().await, Err(ConnError::Cancelled));
        }
        // None of the dumps reached the wire.
        let executed = exec.executed();
        assert_eq!(executed, vec!["SIGNAL HEARTBEAT", "SIGNAL HALT"]);
    }

    #[tokio::test]
    async fn cancel_enqueued_job_never_executes() {
        let exec = ScriptedExecutor::slow(Duration::from_millis(10));
        let q = queue(exec.clone());
        let blocker = q.enqueue(TorCmd::Signal(TorSignal::Heartbeat));
        let victim = q.enqueue(TorCmd::Signal(TorSignal::Dump));
        victim.cancel();
        assert_eq!(victim.state(), JobState::Cancelled);
        assert_matches!(victim.wait().await, Err(ConnError::Cancelled));
        blocker.wait().await.unwrap();
        // Let the processor drain.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(exec.executed(), vec!["SIGNAL HEARTBEAT"]);
    }

    #[tokio::test]
    async fn interceptor_substitutes_command() {
        let exec = ScriptedExecutor::new();
        let q = queue(exec.clone());
        q.add_interceptor(
            "SIGNAL",
            Box::new(|cmd| match cmd {
                TorCmd::Signal(TorSignal::Dump) => Ok(TorCmd::Signal(TorSignal::Debug)),
                other => Ok(other),
            }),
        );
        q.enqueue(TorCmd::Signal(TorSignal::Dump))
            .wait()
            .await
            .unwrap();
        assert_eq!(exec.executed(), vec!["SIGNAL DEBUG"]);
    }

    #[tokio::test]
    async fn interceptor_error_aborts_job() {
        let exec = ScriptedExecutor::new();
        let q = queue(exec.clone());
        q.add_interceptor(
            "DROPGUARDS",
            Box::new(|_| {
                Err(CmdError::Uninterpretable("interceptor refused".into()))
            }),
        );
        let job = q.enqueue(TorCmd::DropGuards);
        assert_matches!(job.wait().await, Err(ConnError::Cmd(_)));
        assert!(exec.executed().is_empty());
    }

    #[tokio::test]
    async fn destroy_interrupts_everything() {
        let exec = ScriptedExecutor::slow(Duration::from_millis(50));
        let q = queue(exec.clone());
        let blocker = q.enqueue(TorCmd::Signal(TorSignal::Heartbeat));
        let queued = q.enqueue(TorCmd::Signal(TorSignal::Dump));
        q.destroy();
        assert_matches!(queued.wait().await, Err(ConnError::Interrupted));
        // Enqueue after destroy fails immediately.
        let late = q.enqueue(TorCmd::DropGuards);
        assert_matches!(late.wait().await, Err(ConnError::Interrupted));
        // Destroy is idempotent.
        q.destroy();
        drop(blocker);
    }
}
