//! Routing from command type to request handler.

use crate::config::ProtocolConfig;
use crate::protocol::{Command, FaultKind, RpcFault};
use crate::{Result, RpcError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Handles every inbound command of one type.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Header type this handler answers.
    fn command_type(&self) -> u32;

    /// Produce the response for `request`. Never fails: failures are encoded
    /// as fault commands carrying the request id.
    async fn handle(&self, request: Command) -> Command;
}

/// Process-wide table of request handlers.
pub struct RequestHandlerRegistry {
    handlers: HashMap<u32, Arc<dyn RequestHandler>>,
    supported_versions: Vec<u32>,
}

impl RequestHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            supported_versions: ProtocolConfig::SUPPORTED_VERSIONS.to_vec(),
        }
    }

    /// Replace the set of protocol versions this registry accepts.
    pub fn with_supported_versions(mut self, versions: &[u32]) -> Self {
        self.supported_versions = versions.to_vec();
        self
    }

    /// Register a handler. Fails if its type is already taken.
    pub fn register(&mut self, handler: Arc<dyn RequestHandler>) -> Result<()> {
        let command_type = handler.command_type();
        if self.handlers.contains_key(&command_type) {
            return Err(RpcError::HandlerConflict { command_type });
        }
        self.handlers.insert(command_type, handler);
        Ok(())
    }

    pub fn get(&self, command_type: u32) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(&command_type).cloned()
    }

    pub fn supports_version(&self, version: u32) -> bool {
        self.supported_versions.contains(&version)
    }

    /// Route `request` to its handler.
    ///
    /// An unsupported version or unknown type yields a fault response for
    /// that request only; the connection keeps serving.
    pub async fn dispatch(&self, request: Command) -> Command {
        let header = *request.header();

        if !self.supports_version(header.version) {
            warn!(
                "Rejecting request {}: unsupported protocol version {}",
                header.request_id, header.version
            );
            return RpcFault::new(
                FaultKind::UnsupportedVersion,
                format!(
                    "protocol version {} not supported (supported: {:?})",
                    header.version, self.supported_versions
                ),
            )
            .into_command(&header);
        }

        match self.handlers.get(&header.command_type) {
            Some(handler) => handler.handle(request).await,
            None => {
                warn!(
                    "Rejecting request {}: unknown command type {}",
                    header.request_id, header.command_type
                );
                RpcFault::new(
                    FaultKind::UnknownCommandType,
                    format!("no handler for command type {}", header.command_type),
                )
                .into_command(&header)
            }
        }
    }
}

impl Default for RequestHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::invocation::decode_response;
    use crate::protocol::{CommandType, Header};

    struct Reverse;

    #[async_trait]
    impl RequestHandler for Reverse {
        fn command_type(&self) -> u32 {
            CommandType::Request.as_u32()
        }

        async fn handle(&self, request: Command) -> Command {
            let mut body = request.payload().to_vec();
            body.reverse();
            Command::reply_to(request.header(), CommandType::Response, body)
        }
    }

    fn registry() -> RequestHandlerRegistry {
        let mut registry = RequestHandlerRegistry::new();
        registry.register(Arc::new(Reverse)).unwrap();
        registry
    }

    fn fault_kind(response: &Command) -> FaultKind {
        match decode_response::<serde_json::Value>(response) {
            Err(RpcError::RemoteFault { kind, .. }) => kind,
            other => panic!("Expected fault, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_type() {
        let request = Command::new(Header::new(5, 1, CommandType::Request), &b"abc"[..]);
        let response = registry().dispatch(request).await;

        assert_eq!(response.request_id(), 5);
        assert_eq!(response.payload().as_ref(), b"cba");
    }

    #[tokio::test]
    async fn test_unknown_type_yields_fault() {
        let request = Command::new(Header::with_raw_type(6, 1, 99), &b""[..]);
        let response = registry().dispatch(request).await;

        assert_eq!(response.request_id(), 6);
        assert_eq!(response.header().kind(), Some(CommandType::Fault));
        assert_eq!(fault_kind(&response), FaultKind::UnknownCommandType);
    }

    #[tokio::test]
    async fn test_unsupported_version_yields_fault() {
        let request = Command::new(Header::new(7, 42, CommandType::Request), &b""[..]);
        let response = registry().dispatch(request).await;

        assert_eq!(response.request_id(), 7);
        assert_eq!(fault_kind(&response), FaultKind::UnsupportedVersion);
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let mut registry = registry();
        let result = registry.register(Arc::new(Reverse));
        assert!(matches!(
            result,
            Err(RpcError::HandlerConflict { command_type: 0 })
        ));
    }
}
