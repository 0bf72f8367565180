//! Connection-oriented transports multiplexing many requests per channel.
//!
//! # Architecture
//!
//! - **Client**: [`TransportClient`] opens a [`Transport`] per remote address.
//!   A transport assigns request ids, tracks pending callers in
//!   [`InFlightRequests`] and matches responses by id from a background read
//!   loop. Frames are written by a single writer task, one at a time.
//! - **Server**: [`TransportServer`] accepts connections and hands every
//!   decoded request to the [`RequestHandlerRegistry`], writing back the
//!   command it produces on the same connection.
//!
//! The TCP implementations are [`TcpTransportClient`] and
//! [`TcpTransportServer`].

pub mod in_flight;
pub mod tcp_client;
pub mod tcp_server;

pub use in_flight::{InFlightRequests, PendingRequest};
pub use tcp_client::{TcpTransport, TcpTransportClient};
pub use tcp_server::TcpTransportServer;

use crate::protocol::Command;
use crate::server::RequestHandlerRegistry;
use crate::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A logical connection to one remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address of the remote endpoint.
    fn remote_addr(&self) -> SocketAddr;

    /// Timeout applied by [`send`](Transport::send).
    fn request_timeout(&self) -> Duration;

    /// Send a request and wait for its response, at most `timeout`.
    ///
    /// The request id of `request` is replaced by a fresh one.
    async fn send_timeout(&self, request: Command, timeout: Duration) -> Result<Command>;

    /// Send a request and wait for its response with the default timeout.
    async fn send(&self, request: Command) -> Result<Command> {
        self.send_timeout(request, self.request_timeout()).await
    }

    /// Release the channel and fail every pending request.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Client role: creates transports.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Connect to `addr`, failing if it takes longer than `connect_timeout`.
    async fn create_transport(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Arc<dyn Transport>>;

    /// Close every transport this client created.
    async fn close(&self);
}

/// Server role: accepts connections and dispatches their requests.
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// Bind `addr` and start serving. Returns the bound address.
    async fn start(
        &self,
        handlers: Arc<RequestHandlerRegistry>,
        addr: SocketAddr,
    ) -> Result<SocketAddr>;

    /// Stop accepting and close every accepted connection. Idempotent.
    fn stop(&self);

    /// Address being served, if running.
    fn local_addr(&self) -> Option<SocketAddr>;
}
