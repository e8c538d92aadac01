//! Error taxonomy for dispatch and message-queue operations.
//!
//! Every Sender failure is a [`DispatchError`]: the failing operation name
//! plus a [`DispatchErrorKind`]. None of them are retried by the dispatch
//! layer; the caller decides.

use crate::transport::{Target, Transport};
use std::fmt;
use thiserror::Error;

/// Status reported by a downstream service that answered with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// HTTP status code (never 2xx).
    Http(u16),
    /// gRPC status code as defined by the gRPC wire protocol (never 0).
    Rpc(i32),
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(code) => write!(f, "HTTP {code}"),
            Self::Rpc(code) => write!(f, "gRPC code {code}"),
        }
    }
}

/// What went wrong during a dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchErrorKind {
    /// Service, method, path parameter or topic could not be resolved.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// Input or output could not be encoded/decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The call was delivered but the remote signaled failure.
    #[error("remote failure ({status}): {body}")]
    Remote {
        /// Status reported by the remote side.
        status: RemoteStatus,
        /// Response body or status message.
        body: String,
    },

    /// Connection, timeout or broker failure.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl DispatchErrorKind {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution",
            Self::Serialization(_) => "serialization",
            Self::Remote { .. } => "remote",
            Self::Transport(_) => "transport",
        }
    }
}

/// Dispatch failure wrapped with the originating operation name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation}: {kind}")]
pub struct DispatchError {
    /// Operation name, `"<transport> <service>.<key>"`.
    pub operation: String,
    /// Failure category.
    #[source]
    pub kind: DispatchErrorKind,
}

impl DispatchError {
    /// Wrap a kind with the operation derived from transport and target.
    #[must_use]
    pub fn new(transport: Transport, target: &Target, kind: DispatchErrorKind) -> Self {
        Self {
            operation: operation_name(transport, target),
            kind,
        }
    }

    /// Whether the target could not be resolved.
    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(self.kind, DispatchErrorKind::Resolution(_))
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        self.kind.label()
    }
}

/// Operation name used for error wrapping and spans.
#[must_use]
pub fn operation_name(transport: Transport, target: &Target) -> String {
    format!("{transport} {target}")
}

/// Errors from message-queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Failed to connect to the broker or build a client.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Topic administration failed.
    #[error("Topic '{topic}' administration failed: {reason}")]
    TopicAdmin {
        /// The topic concerned
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Payload or carrier could not be encoded; nothing was written.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Broker rejected or did not acknowledge the write.
    #[error("Write to topic '{topic}' failed: {reason}")]
    WriteFailed {
        /// The topic concerned
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Reader could not be created or subscribed.
    #[error("Reader for group '{group}' failed: {reason}")]
    ReaderFailed {
        /// Consumer group
        group: String,
        /// The reason for failure
        reason: String,
    },

    /// Fetching the next message failed.
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Committing a consumer-group offset failed.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// The queue has been closed.
    #[error("Queue closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_display_includes_operation() {
        let err = DispatchError::new(
            Transport::Rest,
            &Target::new("auth", "login"),
            DispatchErrorKind::Resolution("service 'auth' is not registered".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "rest auth.login: resolution failed: service 'auth' is not registered"
        );
        assert!(err.is_resolution());
        assert_eq!(err.kind_label(), "resolution");
    }

    #[test]
    fn remote_status_display() {
        assert_eq!(RemoteStatus::Http(404).to_string(), "HTTP 404");
        assert_eq!(RemoteStatus::Rpc(5).to_string(), "gRPC code 5");
    }
}
