//! Shared fixtures for integration tests.

#![allow(dead_code)]

use minirpc::{rpc_service, AccessPoint, RpcError, ServerHandle};
use std::sync::Arc;
use std::time::Duration;

rpc_service! {
    /// Greeting service used across the integration tests.
    pub trait Greeter as "test.Greeter", stub GreeterStub {
        async fn hello(&self, name: String) -> String;
        async fn fail(&self, reason: String) -> ();
        async fn sleep(&self, millis: u64) -> u64;
    }
}

pub struct GreeterImpl;

#[minirpc::async_trait]
impl Greeter for GreeterImpl {
    async fn hello(&self, name: String) -> minirpc::Result<String> {
        Ok(format!("Hello, {}", name))
    }

    async fn fail(&self, reason: String) -> minirpc::Result<()> {
        Err(RpcError::other(reason))
    }

    async fn sleep(&self, millis: u64) -> minirpc::Result<u64> {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(millis)
    }
}

/// Access point on an OS-assigned loopback port.
pub fn loopback_access_point() -> AccessPoint {
    AccessPoint::builder()
        .host("127.0.0.1")
        .port(0)
        .connect_timeout(Duration::from_secs(5))
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Server access point serving [`GreeterImpl`]; returns the provider URI.
pub async fn start_greeter() -> (AccessPoint, ServerHandle, url::Url) {
    let access_point = loopback_access_point();
    let handle = access_point.start_server().await.unwrap();
    let uri = access_point
        .add_service_provider::<dyn Greeter>(Arc::new(GreeterImpl))
        .unwrap();
    (access_point, handle, uri)
}
