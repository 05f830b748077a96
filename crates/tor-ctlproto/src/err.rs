//! Protocol and command errors.

use crate::status::ReplyStatus;

/// A violation of the control protocol's framing or sequencing rules.
///
/// These are connection-fatal: the reader that encounters one destroys
/// the connection, since after a framing error nothing further on the
/// stream can be trusted.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A reply line did not start with three digits and a separator.
    #[error("malformed reply line: {0:?}")]
    MalformedLine(String),

    /// The stream ended inside a dot-terminated data block.
    #[error("connection ended inside a data block")]
    TruncatedDataBlock,

    /// A synchronous reply arrived with no command in flight.
    #[error("unsolicited synchronous reply (status {0})")]
    UnsolicitedReply(ReplyStatus),

    /// tor rejected our authentication.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),
}

/// An error attributable to a single command.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CmdError {
    /// The command could not be rendered from its configuration
    /// (startup-only option in a `SETCONF`, and the like).
    #[error(transparent)]
    Config(#[from] tor_ctlconf::ConfigError),

    /// tor answered with a non-success final line.
    #[error("command rejected ({status}): {text}")]
    Rejected {
        /// The final line's status code.
        status: ReplyStatus,
        /// The final line's payload.
        text: String,
    },

    /// The reply was structurally valid but not interpretable as this
    /// command's expected success value.
    #[error("uninterpretable reply: {0}")]
    Uninterpretable(String),

    /// A protocol violation surfaced while this command was in flight.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
