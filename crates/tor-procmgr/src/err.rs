//! Supervisor errors.

use std::sync::Arc;

/// Why a spawned tor process never became ready.
///
/// Everything observed up to the failure comes along: the exit status
/// (when the process already exited), the line that triggered the
/// verdict, and the captured stdout/stderr tails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message} (exit: {})", exit_display(.exit_code))]
#[non_exhaustive]
pub struct ProcessStartError {
    /// What went wrong.
    pub message: String,
    /// The process exit code, when it had already exited.
    pub exit_code: Option<i32>,
    /// The stdout/stderr line that triggered the failure, if one did.
    pub trigger_line: Option<String>,
    /// Captured stdout lines.
    pub stdout: Vec<String>,
    /// Captured stderr lines.
    pub stderr: Vec<String>,
}

/// Render the exit-code half of the error message.
fn exit_display(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => code.to_string(),
        None => "not exited".to_owned(),
    }
}

impl ProcessStartError {
    /// True if this failure looks like the known zombie-spawn behavior:
    /// a start timeout with nothing ever written to stdout.
    pub fn looks_like_zombie(&self) -> bool {
        self.message.starts_with("Timed out after") && self.stdout.is_empty()
    }
}

/// An error from the process supervisor.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProcError {
    /// The process never became ready.
    #[error(transparent)]
    Start(#[from] ProcessStartError),

    /// A directory could not be created or secured.
    #[error("could not prepare directory")]
    Dir(#[source] Arc<fs_mistrust::Error>),

    /// Spawning or signalling the process failed.
    #[error("process I/O error")]
    Io(#[source] Arc<std::io::Error>),

    /// The control-port file never appeared, or held nothing usable.
    #[error("control-port file unusable: {detail}")]
    CtrlPortFile {
        /// What was wrong with it.
        detail: String,
    },
}

impl From<std::io::Error> for ProcError {
    fn from(e: std::io::Error) -> Self {
        ProcError::Io(Arc::new(e))
    }
}

impl From<fs_mistrust::Error> for ProcError {
    fn from(e: fs_mistrust::Error) -> Self {
        ProcError::Dir(Arc::new(e))
    }
}
