//! Untyped client stub.

use crate::config::ProtocolConfig;
use crate::protocol::invocation::decode_response;
use crate::protocol::RpcRequest;
use crate::transport::Transport;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Proxy bound to one transport and one interface.
///
/// Cheap to clone; holds nothing besides the binding.
#[derive(Clone)]
pub struct Stub {
    transport: Arc<dyn Transport>,
    interface: &'static str,
    version: u32,
    timeout: Option<Duration>,
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("interface", &self.interface)
            .field("remote", &self.transport.remote_addr())
            .field("version", &self.version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Stub {
    pub fn new(transport: Arc<dyn Transport>, interface: &'static str) -> Self {
        Self {
            transport,
            interface,
            version: ProtocolConfig::VERSION,
            timeout: None,
        }
    }

    /// Per-call timeout; the transport default applies when unset.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Protocol version stamped on requests.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn interface(&self) -> &'static str {
        self.interface
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Call `method` with `args` (the argument tuple) and decode the result.
    ///
    /// Transport failures are returned as they are; a fault response becomes
    /// [`RpcError::RemoteFault`](crate::RpcError::RemoteFault).
    pub async fn invoke<A, R>(&self, method: &str, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args)?;
        let request = RpcRequest::new(self.interface, method, args).to_command(self.version)?;

        let response = match self.timeout {
            Some(timeout) => self.transport.send_timeout(request, timeout).await?,
            None => self.transport.send(request).await?,
        };

        decode_response(&response)
    }
}

/// Creates stubs bound to a transport.
pub trait StubFactory: Send + Sync {
    fn create_stub(&self, transport: Arc<dyn Transport>, interface: &'static str) -> Stub;
}

/// Default factory: one generic stub driven by the interface's call table.
#[derive(Debug, Clone, Default)]
pub struct DynamicStubFactory {
    timeout: Option<Duration>,
}

impl DynamicStubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout given to every stub this factory creates.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl StubFactory for DynamicStubFactory {
    fn create_stub(&self, transport: Arc<dyn Transport>, interface: &'static str) -> Stub {
        let stub = Stub::new(transport, interface);
        match self.timeout {
            Some(timeout) => stub.with_timeout(timeout),
            None => stub,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::invocation::success_command;
    use crate::protocol::{Command, FaultKind, RpcFault};
    use crate::RpcError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    /// Transport answering from a closure and recording requests.
    struct ScriptedTransport {
        answer: Box<dyn Fn(&Command) -> Result<Command> + Send + Sync>,
        seen: Mutex<Vec<(RpcRequest, Duration)>>,
    }

    impl ScriptedTransport {
        fn new(answer: impl Fn(&Command) -> Result<Command> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                answer: Box::new(answer),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn remote_addr(&self) -> SocketAddr {
            "127.0.0.1:9999".parse().unwrap()
        }

        fn request_timeout(&self) -> Duration {
            Duration::from_secs(10)
        }

        async fn send_timeout(&self, request: Command, timeout: Duration) -> Result<Command> {
            let decoded = RpcRequest::from_command(&request).unwrap();
            self.seen.lock().unwrap().push((decoded, timeout));
            (self.answer)(&request)
        }

        async fn close(&self) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_invoke_encodes_call_and_decodes_result() {
        let transport = ScriptedTransport::new(|request| {
            success_command(request.header(), &json!("Hello, world"))
        });
        let stub = Stub::new(transport.clone(), "demo.Hello");

        let answer: String = stub.invoke("hello", ("world",)).await.unwrap();
        assert_eq!(answer, "Hello, world");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].0, RpcRequest::new("demo.Hello", "hello", json!(["world"])));
        assert_eq!(seen[0].1, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fault_is_raised_as_remote_fault() {
        let transport = ScriptedTransport::new(|request| {
            Ok(RpcFault::new(FaultKind::Invocation, "nope").into_command(request.header()))
        });
        let stub = Stub::new(transport, "demo.Hello");

        let err = stub.invoke::<_, String>("hello", ("x",)).await.unwrap_err();
        assert!(err.is_remote_fault());
        assert!(!err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates_unchanged() {
        let transport =
            ScriptedTransport::new(|_| Err(RpcError::ConnectionClosed("127.0.0.1:9999".into())));
        let stub = Stub::new(transport, "demo.Hello");

        let err = stub.invoke::<_, String>("hello", ("x",)).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_factory_timeout_applies_to_stubs() {
        let transport =
            ScriptedTransport::new(|request| success_command(request.header(), &json!(null)));
        let factory = DynamicStubFactory::with_timeout(Duration::from_millis(250));
        let stub = factory.create_stub(transport.clone(), "demo.Hello");

        stub.invoke::<_, ()>("ping", ()).await.unwrap();
        assert_eq!(transport.seen.lock().unwrap()[0].1, Duration::from_millis(250));
    }
}
