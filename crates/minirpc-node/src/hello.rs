//! Greeting service served and called by the demo node.

use minirpc::rpc_service;

rpc_service! {
    /// Says hello.
    pub trait HelloService as "minirpc.hello.HelloService", stub HelloServiceStub {
        async fn hello(&self, name: String) -> String;
    }
}

pub struct HelloServiceImpl;

#[minirpc::async_trait]
impl HelloService for HelloServiceImpl {
    async fn hello(&self, name: String) -> minirpc::Result<String> {
        Ok(format!("Hello, {}", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirpc::AccessPoint;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hello_roundtrip() {
        let server = AccessPoint::builder()
            .host("127.0.0.1")
            .port(0)
            .build()
            .unwrap();
        let _handle = server.start_server().await.unwrap();
        let uri = server
            .add_service_provider::<dyn HelloService>(Arc::new(HelloServiceImpl))
            .unwrap();

        let client = AccessPoint::new().unwrap();
        let hello = client
            .get_remote_service::<dyn HelloService>(&uri)
            .await
            .unwrap();
        assert_eq!(hello.hello("Master MQ".to_string()).await.unwrap(), "Hello, Master MQ");

        client.close().await;
        server.close().await;
    }
}
