//! Control-protocol reply status codes.

use caret::caret_int;

caret_int! {
    /// A three-digit status code beginning a reply line.
    ///
    /// Any `u16` is representable; the named values are the codes in
    /// control-spec §4 that this controller handles specially.  The
    /// first digit carries the classification: `2xx` success, `4xx`
    /// temporary failure, `5xx` permanent failure, `6xx` asynchronous
    /// event.
    pub struct ReplyStatus(u16) {
        /// Command succeeded.
        OK = 250,
        /// Noop: the operation was unnecessary.
        OPERATION_UNNECESSARY = 251,
        /// A resource was exhausted.
        RESOURCE_EXHAUSTED = 451,
        /// Protocol syntax error.
        SYNTAX_ERROR_PROTOCOL = 500,
        /// Unrecognized command.
        UNRECOGNIZED_CMD = 510,
        /// Recognized but unimplemented command.
        UNIMPLEMENTED_CMD = 511,
        /// Syntax error in a command argument.
        SYNTAX_ERROR_ARG = 512,
        /// Unrecognized command argument.
        UNRECOGNIZED_ARG = 513,
        /// Authentication required.
        AUTH_REQUIRED = 514,
        /// Bad authentication credentials.
        BAD_AUTH = 515,
        /// Unspecified tor error.
        UNSPECIFIED_ERROR = 550,
        /// Internal tor error.
        INTERNAL_ERROR = 551,
        /// An entity in the command could not be found.
        UNRECOGNIZED_ENTITY = 552,
        /// A configuration value was rejected.
        INVALID_CONFIG_VALUE = 553,
        /// An invalid descriptor was supplied.
        INVALID_DESCRIPTOR = 554,
        /// The entity is not managed by this tor.
        UNMANAGED_ENTITY = 555,
        /// An asynchronous event notification.
        ASYNC_EVENT = 650,
    }
}

impl ReplyStatus {
    /// True for `2xx` codes: the command succeeded.
    pub fn is_success(self) -> bool {
        (200..300).contains(&u16::from(self))
    }

    /// True for `6xx` codes: an asynchronous event frame.
    pub fn is_async(self) -> bool {
        (600..700).contains(&u16::from(self))
    }
}
