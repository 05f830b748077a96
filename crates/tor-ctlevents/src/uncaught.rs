//! Routing for errors raised by observers and job callbacks.

use std::sync::Arc;

use tracing::error;

/// An error (or several) raised from code the runtime does not own:
/// observer callbacks, job completion callbacks, teardown hooks.
///
/// The first failure becomes the primary; everything after it during
/// the same operation is suppressed into the list, so one teardown
/// surfaces one error no matter how many callbacks misbehaved.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{context}: {primary}{}", suppressed_suffix(.suppressed))]
#[non_exhaustive]
pub struct UncaughtError {
    /// What the runtime was doing when the error surfaced.
    pub context: String,
    /// The first failure.
    pub primary: String,
    /// Failures after the first.
    pub suppressed: Vec<String>,
}

/// Format the suppressed-count suffix of an [`UncaughtError`] message.
fn suppressed_suffix(suppressed: &[String]) -> String {
    if suppressed.is_empty() {
        String::new()
    } else {
        format!(" (+{} suppressed)", suppressed.len())
    }
}

impl UncaughtError {
    /// Construct with a single failure.
    pub fn new(context: impl Into<String>, primary: impl Into<String>) -> Self {
        UncaughtError {
            context: context.into(),
            primary: primary.into(),
            suppressed: Vec::new(),
        }
    }

    /// Add a further failure from the same operation.
    pub fn suppress(&mut self, error: impl Into<String>) {
        self.suppressed.push(error.into());
    }
}

/// An accumulator for collecting every failure of one operation into at
/// most one [`UncaughtError`].
#[derive(Debug, Default)]
pub struct Collector {
    /// The error being built, if anything failed yet.
    inner: Option<UncaughtError>,
}

impl Collector {
    /// Record a failure under `context`.
    pub fn push(&mut self, context: &str, error: impl Into<String>) {
        match &mut self.inner {
            Some(e) => e.suppress(error),
            None => self.inner = Some(UncaughtError::new(context, error)),
        }
    }

    /// Surface the collected error, if any, to `handler`.
    pub fn surface(self, handler: &UncaughtHandler) {
        if let Some(e) = self.inner {
            handler(e);
        }
    }
}

/// A handler for [`UncaughtError`]s.
///
/// The handler may itself panic (propagating to whoever is dispatching)
/// or swallow the error; the default logs it.
pub type UncaughtHandler = Arc<dyn Fn(UncaughtError) + Send + Sync>;

/// The default handler: log at error severity and move on.
pub fn default_uncaught_handler() -> UncaughtHandler {
    Arc::new(|e: UncaughtError| {
        error!("uncaught error: {}", e);
        for s in &e.suppressed {
            error!("  suppressed: {}", s);
        }
    })
}
