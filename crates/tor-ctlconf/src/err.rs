//! Errors from building, rendering, and generating configuration.

use tor_ctladdr::{HostIp, Port};

use crate::keyword::TorOption;

/// An error from the configuration layer.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A configured listener port was not available, and reassignment was
    /// disabled (or probing was exhausted).
    #[error("port {port} on {host} is not available")]
    PortUnavailable {
        /// Host the bind was attempted on.
        host: HostIp,
        /// The unavailable port.
        port: Port,
    },

    /// A startup-only option was used where only runtime-changeable
    /// options are allowed (`SETCONF`/`RESETCONF`).
    #[error("{option} can only be set at process start")]
    StartupOnly {
        /// The offending option.
        option: TorOption,
    },

    /// An argument was not valid for its option.
    #[error("invalid value for {}: {detail}", option.as_ref().map_or_else(|| "<unknown>".to_string(), ToString::to_string))]
    InvalidValue {
        /// The option whose argument was rejected, if known.
        option: Option<TorOption>,
        /// What was wrong with it.
        detail: String,
    },

    /// A required setting was absent.
    #[error("required setting {option} is missing")]
    MissingRequired {
        /// The missing option.
        option: TorOption,
    },
}

impl ConfigError {
    /// Construct an `InvalidValue` error with no associated option.
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            option: None,
            detail: detail.into(),
        }
    }

    /// Construct an `InvalidValue` error for `option`.
    pub(crate) fn invalid_for(option: TorOption, detail: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            option: Some(option),
            detail: detail.into(),
        }
    }
}
