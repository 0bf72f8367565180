//! Error types for minirpc.
//!
//! Transport-level failures (the network failed) and remote faults (the remote
//! code failed) are kept apart so callers can tell them apart with
//! [`RpcError::is_transport_failure`] and [`RpcError::is_remote_fault`].

use crate::protocol::FaultKind;
use std::time::Duration;
use thiserror::Error;

/// Main error type for minirpc.
#[derive(Debug, Error)]
pub enum RpcError {
    // Connection setup
    #[error("Failed to connect to {addr}: {message}")]
    ConnectFailed { addr: String, message: String },

    #[error("Connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    // In-flight requests
    #[error("Request {request_id} timed out after {timeout:?}")]
    RequestTimeout { request_id: u32, timeout: Duration },

    #[error("Connection to {0} closed")]
    ConnectionClosed(String),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Faults carried back from the remote side
    #[error("Remote fault ({kind}): {message}")]
    RemoteFault { kind: FaultKind, message: String },

    // Server-side dispatch
    #[error("Service not found: {interface}")]
    ServiceNotFound { interface: String },

    #[error("Method not found: {interface}.{method}")]
    MethodNotFound { interface: String, method: String },

    #[error("Invalid arguments for {method}: {message}")]
    InvalidArguments { method: String, message: String },

    #[error("Service provider already registered for {interface}")]
    ProviderConflict { interface: String },

    #[error("Request handler already registered for command type {command_type}")]
    HandlerConflict { command_type: u32 },

    #[error("Server already running on {addr}")]
    ServerAlreadyRunning { addr: String },

    // Name service
    #[error("No provider registered for service name: {name}")]
    NameNotFound { name: String },

    #[error("No name service supports URI: {uri}")]
    UnsupportedScheme { uri: String },

    #[error("Name service is not connected")]
    NotConnected,

    #[error("Invalid address {address}: {message}")]
    InvalidAddress { address: String, message: String },

    // Component loader
    #[error("No implementation registered for {kind}")]
    ComponentNotFound { kind: String },

    #[error("Conflicting implementations for {kind}: {implementations:?}")]
    ComponentConflict {
        kind: String,
        implementations: Vec<String>,
    },

    // Backing stores and I/O
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for minirpc operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for RpcError {
    fn from(err: rusqlite::Error) -> Self {
        RpcError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<url::ParseError> for RpcError {
    fn from(err: url::ParseError) -> Self {
        RpcError::InvalidAddress {
            address: String::new(),
            message: err.to_string(),
        }
    }
}

impl RpcError {
    /// Shorthand for a failure raised by a service implementation.
    pub fn other(message: impl Into<String>) -> Self {
        RpcError::Other(message.into())
    }

    /// True when the network path failed rather than the remote code.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RpcError::ConnectFailed { .. }
                | RpcError::ConnectTimeout { .. }
                | RpcError::RequestTimeout { .. }
                | RpcError::ConnectionClosed(_)
                | RpcError::Protocol { .. }
                | RpcError::Io { .. }
        )
    }

    /// True when the remote side answered with a fault response.
    pub fn is_remote_fault(&self) -> bool {
        matches!(self, RpcError::RemoteFault { .. })
    }

    /// Fault classification used when this error is sent back to a caller.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            RpcError::ServiceNotFound { .. } => FaultKind::ServiceNotFound,
            RpcError::MethodNotFound { .. } => FaultKind::MethodNotFound,
            RpcError::InvalidArguments { .. } => FaultKind::BadRequest,
            RpcError::RemoteFault { kind, .. } => *kind,
            _ => FaultKind::Invocation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::NameNotFound {
            name: "demo.Hello".into(),
        };
        assert_eq!(
            err.to_string(),
            "No provider registered for service name: demo.Hello"
        );
    }

    #[test]
    fn test_transport_failures_are_not_remote_faults() {
        let timeout = RpcError::RequestTimeout {
            request_id: 3,
            timeout: Duration::from_millis(50),
        };
        assert!(timeout.is_transport_failure());
        assert!(!timeout.is_remote_fault());

        let closed = RpcError::ConnectionClosed("127.0.0.1:9999".into());
        assert!(closed.is_transport_failure());

        let fault = RpcError::RemoteFault {
            kind: FaultKind::Invocation,
            message: "boom".into(),
        };
        assert!(fault.is_remote_fault());
        assert!(!fault.is_transport_failure());
    }

    #[test]
    fn test_fault_kind_mapping() {
        assert_eq!(
            RpcError::MethodNotFound {
                interface: "a".into(),
                method: "b".into()
            }
            .fault_kind(),
            FaultKind::MethodNotFound
        );
        assert_eq!(
            RpcError::other("anything").fault_kind(),
            FaultKind::Invocation
        );
    }
}
