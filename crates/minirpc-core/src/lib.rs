//! minirpc - a minimal RPC framework.
//!
//! A caller invokes a method on a typed stub; the call travels as a framed
//! [`Command`] over a multiplexed TCP [`Transport`], is dispatched on the
//! remote side to the registered provider, and its result or fault comes
//! back on the same connection. A pluggable [`NameService`] maps service
//! names to provider addresses.
//!
//! # Example
//!
//! ```rust,ignore
//! use minirpc::{rpc_service, AccessPoint, ServiceInterface};
//! use std::sync::Arc;
//!
//! rpc_service! {
//!     pub trait HelloService as "demo.HelloService", stub HelloStub {
//!         async fn hello(&self, name: String) -> String;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> minirpc::Result<()> {
//!     let server = AccessPoint::builder().port(0).build()?;
//!     let _handle = server.start_server().await?;
//!     let uri = server.add_service_provider::<dyn HelloService>(Arc::new(MyHello))?;
//!
//!     let client = AccessPoint::new()?;
//!     let hello = client.get_remote_service::<dyn HelloService>(&uri).await?;
//!     println!("{}", hello.hello("world".to_string()).await?);
//!
//!     client.close().await;
//!     server.close().await;
//!     Ok(())
//! }
//! ```

pub mod access_point;
pub mod client;
pub mod components;
pub mod config;
pub mod error;
pub mod nameservice;
pub mod platform;
pub mod protocol;
pub mod server;
pub mod service;
pub mod transport;

mod macros;

// Re-export commonly used types
pub use access_point::{AccessPoint, AccessPointBuilder, ServerHandle};
pub use client::{DynamicStubFactory, Stub, StubFactory};
pub use components::{ComponentContext, Lifecycle};
pub use config::AccessPointConfig;
pub use error::{Result, RpcError};
pub use nameservice::{
    MemoryNameService, NameService, RandomSelection, SelectionStrategy, SqliteNameService,
};
pub use protocol::{Command, CommandType, FaultKind, Header};
pub use server::{RequestHandler, RequestHandlerRegistry, ServiceProvider, ServiceProviderRegistry};
pub use service::{ProviderAdapter, ServiceInterface};
pub use transport::{Transport, TransportClient, TransportServer};

pub use async_trait::async_trait;

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;
    pub use serde_json;
}
