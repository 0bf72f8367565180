//! Server-side dispatch.
//!
//! Inbound commands are routed by header type through the
//! [`RequestHandlerRegistry`]. The invocation handler decodes the request,
//! resolves the target in the [`ServiceProviderRegistry`] and encodes the
//! result or fault. Both registries are filled during startup and only read
//! while serving.

pub mod handler_registry;
pub mod provider_registry;
pub mod rpc_handler;

pub use handler_registry::{RequestHandler, RequestHandlerRegistry};
pub use provider_registry::{ServiceProvider, ServiceProviderRegistry};
pub use rpc_handler::RpcRequestHandler;
