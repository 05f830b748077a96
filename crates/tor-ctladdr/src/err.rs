//! Parse errors for controller address types.

/// An error from parsing one of this crate's value types.
///
/// The error keeps the offending input so that a failure deep inside
/// config generation can still be attributed to the value that caused it.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The input did not have the shape the target type requires.
    #[error("{input:?} is not a valid {expecting}")]
    Invalid {
        /// The string we were asked to parse.
        input: String,
        /// A human-readable name for what we expected to find.
        expecting: &'static str,
    },
    /// The input had the right shape, but a value out of range.
    #[error("{input:?}: {expecting} out of range ({low}..={high})")]
    OutOfRange {
        /// The string we were asked to parse.
        input: String,
        /// A human-readable name for what we expected to find.
        expecting: &'static str,
        /// Lowest acceptable value.
        low: u16,
        /// Highest acceptable value.
        high: u16,
    },
}

impl ParseError {
    /// Construct an `Invalid` error for `input`.
    pub(crate) fn invalid(input: impl Into<String>, expecting: &'static str) -> Self {
        ParseError::Invalid {
            input: input.into(),
            expecting,
        }
    }
}
