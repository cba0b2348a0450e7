//! Error types for replication.
//!
//! - [`ServiceError`]: raised by the wrapped object itself. Serializable so a
//!   remote failure can come back as a value.
//! - [`StreamError`]: state stream failures (closed, stalled, transport).
//! - [`ReplicationError`]: what callers of a replicated proxy see.
//!
//! Transport failures are [`TransportError`](crate::transport::TransportError).

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};

/// Failure raised by the wrapped object's own logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ServiceError {
    /// The operation failed
    #[error("{message}")]
    Failed {
        /// Error message from the object
        message: String,
    },

    /// The object does not implement the named method
    #[error("Unknown method: {method}")]
    UnknownMethod {
        /// Method name
        method: String,
    },

    /// An argument had the wrong shape
    #[error("Invalid argument for {method}: {reason}")]
    InvalidArgument {
        /// Method name
        method: String,
        /// What was wrong
        reason: String,
    },

    /// Reading or writing state failed
    #[error("State transfer failed: {message}")]
    State {
        /// Error message
        message: String,
    },
}

impl ServiceError {
    /// Create a generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Create an unknown method error
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

impl From<StreamError> for ServiceError {
    fn from(err: StreamError) -> Self {
        Self::State {
            message: err.to_string(),
        }
    }
}

/// State stream failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// The stream was already closed
    #[error("Stream closed")]
    Closed,

    /// No chunk moved within the I/O timeout
    #[error("Stream stalled for {timeout_ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Sending a chunk failed
    #[error("Stream transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Error surfaced by a replicated proxy.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// The local invocation failed; this is the object's own error
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A replicated call could not be dispatched
    #[error("{method}({args}) failed: {source}")]
    Dispatch {
        /// Method name
        method: String,
        /// Rendered arguments
        args: String,
        /// Underlying cause
        #[source]
        source: Box<ReplicationError>,
    },

    /// The interface has no method with this name
    #[error("No such method: {method}")]
    NoSuchMethod {
        /// Method name
        method: String,
    },

    /// A state-replicating method was called without a usable state id
    #[error("Method {method} needs a text or null state id as its first argument")]
    InvalidStateId {
        /// Method name
        method: String,
    },

    /// The interface cannot be numbered or a message had the wrong shape
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// Configuration was rejected
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// State stream failure
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl ReplicationError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wrap a failure with the call it interrupted
    pub fn dispatch(method: &str, args: &[crate::Value], source: ReplicationError) -> Self {
        let args = args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self::Dispatch {
            method: method.to_string(),
            args,
            source: Box::new(source),
        }
    }
}

/// Result alias for replication operations
pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn service_error_is_transparent() {
        let err = ReplicationError::from(ServiceError::failed("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(matches!(err, ReplicationError::Service(_)));
    }

    #[test]
    fn dispatch_error_names_method_and_args() {
        let err = ReplicationError::dispatch(
            "put",
            &[Value::from("k"), Value::Int(3)],
            TransportError::NotConnected.into(),
        );
        let text = err.to_string();
        assert!(text.starts_with(r#"put("k", 3) failed"#), "{text}");
        assert!(std::error::Error::source(&err).is_some());
    }
}
