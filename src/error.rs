use std::time::Duration;

use thiserror::Error;

/// Failure talking to the shared key-value store.
///
/// Never crosses the crate boundary during request handling: the limiter
/// fails open and the cache falls through to the builder.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },
    #[error("backend call `{op}` timed out after {elapsed:?}")]
    Timeout { op: &'static str, elapsed: Duration },
    #[error("unexpected backend reply: {message}")]
    Protocol { message: String },
}

impl BackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Protocol { .. } => "protocol",
        }
    }
}

impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            Self::unavailable(err.to_string())
        } else {
            Self::protocol(err.to_string())
        }
    }
}

/// Invalid policy or settings. Raised while wiring things up, not per request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
    #[error("no rate-limit policy named `{name}`")]
    UnknownPolicy { name: String },
}

impl ConfigurationError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_policy(name: impl Into<String>) -> Self {
        Self::UnknownPolicy { name: name.into() }
    }
}
