//! Watching tor's startup output for the ready/failed verdict.

use std::sync::Mutex;

use tokio::sync::watch;

use crate::err::ProcessStartError;

/// How many lines we let tor print before deciding it will never tell
/// us about a control listener.
const LINE_CAP: usize = 50;

/// The ready marker, matched case-insensitively as a substring.
const READY_MARKER: &str = " [notice] opened control listener connection (ready) on ";

/// The error marker.
const ERR_MARKER: &str = " [err] ";

/// The clashing-data-directory warning, a startup failure even at warn
/// severity.
const CLASH_MARKER: &str =
    " [warn] it looks like another tor process is running with the same data directory.";

/// The startup verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum FeedStatus {
    /// Still waiting for a verdict.
    Waiting,
    /// The control listener is open.
    Ready,
    /// Startup failed; the error carries the captured output.
    Failed(ProcessStartError),
}

/// Mutable feed state.
#[derive(Debug)]
struct FeedState {
    /// Lines seen on stdout so far.
    stdout: Vec<String>,
    /// Lines seen on stderr so far.
    stderr: Vec<String>,
    /// The verdict, once reached.
    status: FeedStatus,
    /// Exit code, when the process exited before readiness.
    exit_code: Option<i32>,
}

/// A parser over tor's startup stdout/stderr.
///
/// The stdio reader tasks feed lines in; whoever is starting the
/// process awaits the verdict via [`StartupFeed::watch`].
#[derive(Debug)]
pub struct StartupFeed {
    /// The state.
    state: Mutex<FeedState>,
    /// Publishes verdict changes.
    tx: watch::Sender<FeedStatus>,
}

impl Default for StartupFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupFeed {
    /// A feed with no lines seen.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FeedStatus::Waiting);
        StartupFeed {
            state: Mutex::new(FeedState {
                stdout: Vec::new(),
                stderr: Vec::new(),
                status: FeedStatus::Waiting,
                exit_code: None,
            }),
            tx,
        }
    }

    /// Subscribe to verdict changes.
    pub fn watch(&self) -> watch::Receiver<FeedStatus> {
        self.tx.subscribe()
    }

    /// The current verdict.
    pub fn status(&self) -> FeedStatus {
        self.state.lock().expect("feed poisoned").status.clone()
    }

    /// Record a stdout line.
    pub fn observe_stdout(&self, line: &str) {
        self.observe(line, false);
    }

    /// Record a stderr line.
    pub fn observe_stderr(&self, line: &str) {
        self.observe(line, true);
    }

    /// Record end of output.  Before readiness this is a failure.
    pub fn observe_eof(&self) {
        let mut state = self.state.lock().expect("feed poisoned");
        if state.status != FeedStatus::Waiting {
            return;
        }
        let error = build_error(&state, "Process exited unexpectedly".to_owned(), None);
        state.status = FeedStatus::Failed(error);
        let _ = self.tx.send(state.status.clone());
    }

    /// Record the exit code, for attribution in any later error.
    pub fn observe_exit(&self, code: Option<i32>) {
        let mut state = self.state.lock().expect("feed poisoned");
        state.exit_code = code;
    }

    /// Declare the wait timed out.  Produces the failure verdict the
    /// zombie heuristic looks for.
    pub fn observe_timeout(&self, seconds: u64) {
        let mut state = self.state.lock().expect("feed poisoned");
        if state.status != FeedStatus::Waiting {
            return;
        }
        let error = build_error(
            &state,
            format!("Timed out after {seconds}s waiting for the control listener"),
            None,
        );
        state.status = FeedStatus::Failed(error);
        let _ = self.tx.send(state.status.clone());
    }

    /// Record one line from either stream.
    fn observe(&self, line: &str, is_stderr: bool) {
        let mut state = self.state.lock().expect("feed poisoned");
        if state.stdout.len() + state.stderr.len() < LINE_CAP * 2 {
            if is_stderr {
                state.stderr.push(line.to_owned());
            } else {
                state.stdout.push(line.to_owned());
            }
        }
        if state.status != FeedStatus::Waiting {
            return;
        }
        let lower = line.to_ascii_lowercase();
        if lower.contains(READY_MARKER) {
            state.status = FeedStatus::Ready;
        } else if lower.contains(ERR_MARKER) || lower.contains(CLASH_MARKER) {
            let error = build_error(
                &state,
                format!("Process reported an error: {line}"),
                Some(line.to_owned()),
            );
            state.status = FeedStatus::Failed(error);
        } else if state.stdout.len() >= LINE_CAP {
            let error = build_error(
                &state,
                format!(
                    "Process has output {LINE_CAP} lines without informing us of a control \
                     listener yet"
                ),
                Some(line.to_owned()),
            );
            state.status = FeedStatus::Failed(error);
        } else {
            return;
        }
        let _ = self.tx.send(state.status.clone());
    }
}

/// Assemble a [`ProcessStartError`] from the feed's captures.
fn build_error(
    state: &FeedState,
    message: String,
    trigger_line: Option<String>,
) -> ProcessStartError {
    ProcessStartError {
        message,
        exit_code: state.exit_code,
        trigger_line,
        stdout: state.stdout.clone(),
        stderr: state.stderr.clone(),
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
    use assert_matches::assert_matches;

    const READY_LINE: &str =
        "May 01 12:00:00.000 [notice] Opened Control listener connection (ready) on 127.0.0.1:9051";

    #[test]
    fn ready_marker_is_case_insensitive() {
        let feed = StartupFeed::new();
        feed.observe_stdout("May 01 12:00:00.000 [notice] Bootstrapped 0% (starting)");
        assert_eq!(feed.status(), FeedStatus::Waiting);
        feed.observe_stdout(READY_LINE);
        assert_eq!(feed.status(), FeedStatus::Ready);
    }

    #[test]
    fn err_line_fails_startup() {
        let feed = StartupFeed::new();
        feed.observe_stdout("May 01 12:00:00.000 [err] Reading config failed");
        assert_matches!(feed.status(), FeedStatus::Failed(e) => {
            assert!(e.message.contains("Reading config failed"));
            assert_eq!(e.stdout.len(), 1);
        });
    }

    #[test]
    fn data_directory_clash_fails_startup() {
        let feed = StartupFeed::new();
        feed.observe_stdout(
            "May 01 12:00:00.000 [warn] It looks like another Tor process is running \
             with the same data directory.",
        );
        assert_matches!(feed.status(), FeedStatus::Failed(_));
    }

    #[test]
    fn ordinary_warn_is_not_fatal() {
        let feed = StartupFeed::new();
        feed.observe_stdout("May 01 12:00:00.000 [warn] Something mildly concerning");
        assert_eq!(feed.status(), FeedStatus::Waiting);
    }

    #[test]
    fn line_cap_overflow_fails_startup() {
        let feed = StartupFeed::new();
        for i in 0..50 {
            feed.observe_stdout(&format!("May 01 12:00:00.000 [notice] line {i}"));
        }
        assert_matches!(feed.status(), FeedStatus::Failed(e) => {
            assert!(e.message.contains("50 lines"));
        });
    }

    #[test]
    fn eof_before_ready_fails_startup() {
        let feed = StartupFeed::new();
        feed.observe_exit(Some(1));
        feed.observe_eof();
        assert_matches!(feed.status(), FeedStatus::Failed(e) => {
            assert_eq!(e.message, "Process exited unexpectedly");
            assert_eq!(e.exit_code, Some(1));
        });
    }

    #[test]
    fn verdict_is_sticky() {
        let feed = StartupFeed::new();
        feed.observe_stdout(READY_LINE);
        feed.observe_eof();
        assert_eq!(feed.status(), FeedStatus::Ready);
    }

    #[test]
    fn timeout_with_no_output_looks_like_zombie() {
        let feed = StartupFeed::new();
        feed.observe_timeout(10);
        assert_matches!(feed.status(), FeedStatus::Failed(e) => {
            assert!(e.looks_like_zombie());
        });

        let feed = StartupFeed::new();
        feed.observe_stdout("May 01 12:00:00.000 [notice] chatter");
        feed.observe_timeout(10);
        assert_matches!(feed.status(), FeedStatus::Failed(e) => {
            assert!(!e.looks_like_zombie());
        });
    }

    #[tokio::test]
    async fn watch_sees_transition() {
        let feed = StartupFeed::new();
        let mut rx = feed.watch();
        assert_eq!(*rx.borrow(), FeedStatus::Waiting);
        feed.observe_stdout(READY_LINE);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), FeedStatus::Ready);
    }
}
