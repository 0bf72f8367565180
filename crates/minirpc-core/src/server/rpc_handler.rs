//! Handler for method invocation requests.

use super::handler_registry::RequestHandler;
use super::provider_registry::ServiceProviderRegistry;
use crate::protocol::invocation::success_command;
use crate::protocol::{Command, CommandType, FaultKind, RpcFault, RpcRequest};
use crate::{Result, RpcError};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Decodes [`RpcRequest`]s and invokes the matching provider.
pub struct RpcRequestHandler {
    providers: Arc<ServiceProviderRegistry>,
}

impl RpcRequestHandler {
    pub fn new(providers: Arc<ServiceProviderRegistry>) -> Self {
        Self { providers }
    }

    async fn invoke(&self, request: RpcRequest) -> Result<serde_json::Value> {
        let provider = self.providers.resolve(&request.interface, &request.method)?;

        match AssertUnwindSafe(provider.invoke(&request.method, request.args))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    "Provider {}.{} panicked: {}",
                    request.interface, request.method, message
                );
                Err(RpcError::Other(format!(
                    "{}.{} panicked: {}",
                    request.interface, request.method, message
                )))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl RequestHandler for RpcRequestHandler {
    fn command_type(&self) -> u32 {
        CommandType::Request.as_u32()
    }

    async fn handle(&self, request: Command) -> Command {
        let header = *request.header();

        let invocation = match RpcRequest::from_command(&request) {
            Ok(invocation) => invocation,
            Err(e) => {
                debug!("Bad request {}: {}", header.request_id, e);
                return RpcFault::new(FaultKind::BadRequest, e.to_string()).into_command(&header);
            }
        };

        let target = format!("{}.{}", invocation.interface, invocation.method);
        match self.invoke(invocation).await {
            Ok(value) => success_command(&header, &value).unwrap_or_else(|e| {
                RpcFault::new(
                    FaultKind::Invocation,
                    format!("failed to encode result of {}: {}", target, e),
                )
                .into_command(&header)
            }),
            Err(e) => {
                debug!("Request {} to {} failed: {}", header.request_id, target, e);
                RpcFault::new(e.fault_kind(), e.to_string()).into_command(&header)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::invocation::decode_response;
    use crate::protocol::Header;
    use crate::server::ServiceProvider;
    use serde_json::{json, Value};

    struct Calculator;

    #[async_trait]
    impl ServiceProvider for Calculator {
        fn interface(&self) -> &str {
            "test.Calculator"
        }

        fn methods(&self) -> &[&'static str] {
            &["div", "explode"]
        }

        async fn invoke(&self, method: &str, args: Value) -> Result<Value> {
            match method {
                "div" => {
                    let (a, b): (i64, i64) = serde_json::from_value(args)?;
                    if b == 0 {
                        return Err(RpcError::other("division by zero"));
                    }
                    Ok(json!(a / b))
                }
                "explode" => panic!("provider exploded"),
                _ => unreachable!(),
            }
        }
    }

    fn handler() -> RpcRequestHandler {
        let providers = Arc::new(ServiceProviderRegistry::new());
        providers.add_service_provider(Arc::new(Calculator)).unwrap();
        RpcRequestHandler::new(providers)
    }

    fn call(interface: &str, method: &str, args: Value) -> Command {
        RpcRequest::new(interface, method, args)
            .to_command(1)
            .unwrap()
            .with_request_id(9)
    }

    fn expect_fault(response: &Command) -> (FaultKind, String) {
        assert_eq!(response.request_id(), 9);
        match decode_response::<Value>(response) {
            Err(RpcError::RemoteFault { kind, message }) => (kind, message),
            other => panic!("Expected fault, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_successful_invocation() {
        let response = handler().handle(call("test.Calculator", "div", json!([9, 3]))).await;

        assert_eq!(response.request_id(), 9);
        assert_eq!(decode_response::<i64>(&response).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_provider_error_becomes_invocation_fault() {
        let response = handler().handle(call("test.Calculator", "div", json!([1, 0]))).await;
        let (kind, message) = expect_fault(&response);

        assert_eq!(kind, FaultKind::Invocation);
        assert!(message.contains("division by zero"));
    }

    #[tokio::test]
    async fn test_unknown_service_and_method() {
        let handler = handler();

        let response = handler.handle(call("test.Missing", "div", json!([]))).await;
        assert_eq!(expect_fault(&response).0, FaultKind::ServiceNotFound);

        let response = handler.handle(call("test.Calculator", "mul", json!([]))).await;
        assert_eq!(expect_fault(&response).0, FaultKind::MethodNotFound);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_bad_request() {
        let request = Command::new(Header::new(9, 1, CommandType::Request), &b"{"[..]);
        let response = handler().handle(request).await;
        assert_eq!(expect_fault(&response).0, FaultKind::BadRequest);
    }

    #[tokio::test]
    async fn test_panicking_provider_yields_fault() {
        let response = handler().handle(call("test.Calculator", "explode", json!([]))).await;
        let (kind, message) = expect_fault(&response);

        assert_eq!(kind, FaultKind::Invocation);
        assert!(message.contains("provider exploded"));
    }
}
