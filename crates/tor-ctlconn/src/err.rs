//! Errors from the connection and queue layer.

use std::sync::Arc;

use tor_ctlproto::{CmdError, ProtocolError};

/// An error resolving a job or operating the connection.
///
/// Cloneable so that one failure can resolve a waiter and every
/// completion callback.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnError {
    /// The command itself failed (rejected, unrenderable, or its reply
    /// was uninterpretable).
    #[error(transparent)]
    Cmd(#[from] CmdError),

    /// The socket closed while this command was in flight.
    #[error("connection closed mid-command")]
    ConnectionClosed,

    /// The job was cancelled deliberately.
    #[error("job cancelled")]
    Cancelled,

    /// The job was cancelled because its owner was destroyed.
    #[error("job interrupted by destruction")]
    Interrupted,

    /// A socket-level I/O failure.
    #[error("control connection I/O error")]
    Io(#[source] Arc<std::io::Error>),

    /// The endpoint cannot be connected on this host.
    #[error("unsupported endpoint: {0}")]
    Unsupported(&'static str),
}

impl ConnError {
    /// True for the two cancellation variants.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConnError::Cancelled | ConnError::Interrupted)
    }
}

impl From<ProtocolError> for ConnError {
    fn from(e: ProtocolError) -> Self {
        ConnError::Cmd(CmdError::Protocol(e))
    }
}

impl From<std::io::Error> for ConnError {
    fn from(e: std::io::Error) -> Self {
        ConnError::Io(Arc::new(e))
    }
}
