//! The umbrella error type.

use tor_ctladdr::ParseError;
use tor_ctlconf::ConfigError;
use tor_ctlconn::ConnError;
use tor_procmgr::ProcError;

/// Broad classification of a runtime error, for callers that dispatch
/// on category rather than on the full error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The configuration could not be generated or applied.
    Configuration,
    /// The tor process could not be started or supervised.
    Process,
    /// The control connection or a command on it failed.
    Connection,
    /// A required resource (tor binary, geoip file) was unavailable.
    Resource,
    /// The operation was cancelled.
    Cancelled,
    /// A value failed to parse.
    Parse,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Process => "process error",
            ErrorKind::Connection => "connection error",
            ErrorKind::Resource => "resource error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Parse => "parse error",
        };
        write!(f, "{}", name)
    }
}

/// An error from the controller runtime.
///
/// Every failure carries enough context to be attributed: component
/// errors keep their own detail, and log lines carry the instance
/// `fid`.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Config building or generation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The supervisor could not produce a ready process.
    #[error(transparent)]
    Process(#[from] ProcError),

    /// The control connection failed, or a command on it did.
    #[error(transparent)]
    Conn(#[from] ConnError),

    /// An address or option value failed to parse.
    #[error(transparent)]
    Addr(#[from] ParseError),

    /// The resource loader could not supply something.
    #[error("resource unavailable: {detail}")]
    Resource {
        /// What was missing.
        detail: String,
    },

    /// The action was cancelled before it completed.
    #[error("action cancelled")]
    Cancelled,
}

impl Error {
    /// The broad classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Process(_) => ErrorKind::Process,
            Error::Conn(e) if e.is_cancellation() => ErrorKind::Cancelled,
            Error::Conn(_) => ErrorKind::Connection,
            Error::Addr(_) => ErrorKind::Parse,
            Error::Resource { .. } => ErrorKind::Resource,
            Error::Cancelled => ErrorKind::Cancelled,
        }
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

    #[test]
    fn kinds() {
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::from(ConnError::Cancelled).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            Error::from(ConnError::ConnectionClosed).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            Error::Resource {
                detail: "no tor".into()
            }
            .kind(),
            ErrorKind::Resource
        );
    }
}
