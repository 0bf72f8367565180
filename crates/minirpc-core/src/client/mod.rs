//! Client side: untyped stubs and the factory that creates them.
//!
//! Typed proxies generated by [`rpc_service!`](crate::rpc_service) wrap a
//! [`Stub`] and forward each method call to [`Stub::invoke`].

pub mod stub;

pub use stub::{DynamicStubFactory, Stub, StubFactory};
