//! Binding between typed service traits and the untyped RPC layer.
//!
//! [`ServiceInterface`] is implemented by [`rpc_service!`](crate::rpc_service)
//! for `dyn Trait`. It names the interface, lists its closed method set,
//! binds a client stub and decodes server-side calls. The same generated
//! table drives both sides, so client encoding and server decoding cannot
//! drift apart.

use crate::client::Stub;
use crate::server::ServiceProvider;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A service interface usable on both ends of a call.
#[async_trait]
pub trait ServiceInterface: Send + Sync + 'static {
    /// Interface identity carried in every request.
    const NAME: &'static str;

    /// Declared methods.
    const METHODS: &'static [&'static str];

    /// Typed client proxy.
    type Stub: Send + Sync;

    /// Wrap an untyped stub in the typed proxy.
    fn bind(stub: Stub) -> Self::Stub;

    /// Decode `args`, call `method` on `self` and encode its result.
    async fn dispatch(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value>;
}

/// Exposes a [`ServiceInterface`] implementation as a [`ServiceProvider`].
pub struct ProviderAdapter<I: ?Sized + ServiceInterface> {
    inner: Arc<I>,
}

impl<I: ?Sized + ServiceInterface> ProviderAdapter<I> {
    pub fn new(inner: Arc<I>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<I: ?Sized + ServiceInterface> ServiceProvider for ProviderAdapter<I> {
    fn interface(&self) -> &str {
        I::NAME
    }

    fn methods(&self) -> &[&'static str] {
        I::METHODS
    }

    async fn invoke(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        self.inner.dispatch(method, args).await
    }
}
