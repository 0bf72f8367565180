//! TCP transport client.
//!
//! Each [`TcpTransport`] owns one TCP connection split into two background
//! tasks: a writer draining an outbound queue one frame at a time, and a
//! reader completing pending requests by id. Any number of tasks may call
//! [`Transport::send`] concurrently; each observes only its own response.

use super::in_flight::InFlightRequests;
use super::{Transport, TransportClient};
use crate::config::TransportConfig;
use crate::protocol::{check_frame_size, read_command, write_frame, Command};
use crate::{Result, RpcError};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Roughly 30 years; stands in for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// A multiplexed request/response channel over one TCP connection.
pub struct TcpTransport {
    remote: SocketAddr,
    peer: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    in_flight: Arc<InFlightRequests>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("remote", &self.remote)
            .field("in_flight", &self.in_flight.len())
            .field("closed", &self.in_flight.is_closed())
            .finish()
    }
}

impl TcpTransport {
    /// Connect to `addr`, giving up after `connect_timeout`.
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
        max_in_flight: usize,
    ) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::ConnectTimeout {
                addr: addr.to_string(),
                timeout: connect_timeout,
            })?
            .map_err(|e| RpcError::ConnectFailed {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        stream.set_nodelay(true)?;
        debug!("Transport connected to {}", addr);

        Ok(Self::from_stream(stream, addr, request_timeout, max_in_flight))
    }

    /// Wrap an already connected stream and start its reader and writer.
    pub fn from_stream(
        stream: TcpStream,
        remote: SocketAddr,
        request_timeout: Duration,
        max_in_flight: usize,
    ) -> Arc<Self> {
        let peer = remote.to_string();
        let in_flight = Arc::new(InFlightRequests::new(peer.clone(), max_in_flight));
        let (reader, writer) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();

        let writer_task = tokio::spawn(Self::write_loop(writer, queue, in_flight.clone()));
        let reader_task = tokio::spawn(Self::read_loop(reader, in_flight.clone(), peer.clone()));

        Arc::new(Self {
            remote,
            peer,
            outbound,
            in_flight,
            tasks: Mutex::new(vec![writer_task, reader_task]),
            request_timeout,
        })
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.in_flight.len()
    }

    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut queue: mpsc::UnboundedReceiver<Bytes>,
        in_flight: Arc<InFlightRequests>,
    ) {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!("Transport write failed: {}", e);
                in_flight.fail_all();
                break;
            }
        }
        let _ = writer.shutdown().await;
    }

    async fn read_loop(reader: OwnedReadHalf, in_flight: Arc<InFlightRequests>, peer: String) {
        let mut reader = BufReader::new(reader);
        loop {
            match read_command(&mut reader).await {
                Ok(Some(Ok(response))) => {
                    let request_id = response.request_id();
                    if !in_flight.complete(response) {
                        debug!(
                            "Discarding response {} from {}: no caller waiting",
                            request_id, peer
                        );
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!("Skipping undecodable frame from {}: {}", peer, e);
                }
                Ok(None) => {
                    debug!("Transport to {} closed by peer", peer);
                    break;
                }
                Err(e) => {
                    debug!("Transport to {} failed: {}", peer, e);
                    break;
                }
            }
        }
        in_flight.fail_all();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn send_timeout(&self, request: Command, timeout: Duration) -> Result<Command> {
        // A request too large for one frame fails on its own
        // instead of breaking the connection every other caller shares.
        check_frame_size(request.encoded_len())?;

        let deadline = deadline_after(timeout);

        // Waiting for a back-pressure permit counts against the timeout;
        // no id has been assigned yet, so the error reports id 0.
        let pending = tokio::time::timeout_at(deadline, self.in_flight.register())
            .await
            .map_err(|_| RpcError::RequestTimeout {
                request_id: 0,
                timeout,
            })??;
        let request_id = pending.request_id;

        let frame = request.with_request_id(request_id).encode();
        if self.outbound.send(frame).is_err() {
            self.in_flight.abandon(request_id);
            return Err(RpcError::ConnectionClosed(self.peer.clone()));
        }

        match tokio::time::timeout_at(deadline, pending.wait(&self.peer)).await {
            Ok(result) => result,
            Err(_) => {
                self.in_flight.abandon(request_id);
                debug!("Request {} to {} timed out", request_id, self.peer);
                Err(RpcError::RequestTimeout {
                    request_id,
                    timeout,
                })
            }
        }
    }

    async fn close(&self) {
        let failed = self.in_flight.fail_all();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        debug!(
            "Transport to {} closed ({} pending requests failed)",
            self.peer, failed
        );
    }

    fn is_closed(&self) -> bool {
        self.in_flight.is_closed()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.in_flight.fail_all();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Creates [`TcpTransport`]s and remembers them so [`close`](TransportClient::close)
/// can release them all.
pub struct TcpTransportClient {
    request_timeout: Duration,
    max_in_flight: usize,
    transports: Mutex<Vec<Weak<TcpTransport>>>,
}

impl TcpTransportClient {
    pub fn new() -> Self {
        Self {
            request_timeout: TransportConfig::REQUEST_TIMEOUT,
            max_in_flight: TransportConfig::MAX_IN_FLIGHT_REQUESTS,
            transports: Mutex::new(Vec::new()),
        }
    }

    /// Default timeout of transports created from now on.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Back-pressure limit of transports created from now on.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

impl Default for TcpTransportClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportClient for TcpTransportClient {
    async fn create_transport(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Arc<dyn Transport>> {
        let transport =
            TcpTransport::connect(addr, connect_timeout, self.request_timeout, self.max_in_flight)
                .await?;

        let mut transports = self.transports.lock().unwrap_or_else(PoisonError::into_inner);
        transports.retain(|t| t.strong_count() > 0);
        transports.push(Arc::downgrade(&transport));

        Ok(transport)
    }

    async fn close(&self) {
        let live: Vec<Arc<TcpTransport>> = self
            .transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .filter_map(|t| t.upgrade())
            .collect();
        for transport in live {
            transport.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_frame, write_command, CommandType, Header};
    use tokio::net::TcpListener;

    fn request(payload: &'static [u8]) -> Command {
        Command::new(Header::new(0, 1, CommandType::Request), payload)
    }

    /// Echo server answering every request with its own payload.
    async fn spawn_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = stream.into_split();
                    while let Ok(Some(frame)) = read_frame(&mut reader).await {
                        let command = Command::decode(frame).unwrap();
                        let reply = Command::reply_to(
                            command.header(),
                            CommandType::Response,
                            command.payload().clone(),
                        );
                        if write_command(&mut writer, &reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    /// Server that reads requests and never answers.
    async fn spawn_silent_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut reader = stream;
                    while let Ok(Some(_)) = read_frame(&mut reader).await {}
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_send_receives_matching_response() {
        let addr = spawn_echo_server().await;
        let transport = TcpTransport::connect(addr, Duration::from_secs(5), Duration::from_secs(5), 16)
            .await
            .unwrap();

        let response = transport.send(request(b"ping")).await.unwrap();
        assert_eq!(response.payload().as_ref(), b"ping");
        assert_eq!(response.header().kind(), Some(CommandType::Response));
        assert_eq!(transport.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused_returns_connect_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TcpTransport::connect(addr, Duration::from_secs(5), Duration::from_secs(5), 16).await;
        match result {
            Err(RpcError::ConnectFailed { addr: failed, .. }) => assert_eq!(failed, addr.to_string()),
            other => panic!("Expected ConnectFailed, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_timeout_removes_pending_entry() {
        let addr = spawn_silent_server().await;
        let transport = TcpTransport::connect(addr, Duration::from_secs(5), Duration::from_secs(5), 16)
            .await
            .unwrap();

        let result = transport
            .send_timeout(request(b"slow"), Duration::from_millis(50))
            .await;

        assert!(matches!(result, Err(RpcError::RequestTimeout { .. })));
        assert_eq!(transport.pending_requests(), 0);
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let addr = spawn_echo_server().await;
        let transport = TcpTransport::connect(addr, Duration::from_secs(5), Duration::from_secs(5), 16)
            .await
            .unwrap();

        let response = transport
            .send_timeout(request(b"patient"), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(response.payload().as_ref(), b"patient");
    }

    #[tokio::test]
    async fn test_oversized_request_fails_alone() {
        let addr = spawn_echo_server().await;
        let transport = TcpTransport::connect(addr, Duration::from_secs(5), Duration::from_secs(5), 16)
            .await
            .unwrap();

        let payload = vec![0u8; crate::config::ProtocolConfig::MAX_FRAME_SIZE];
        let oversized = Command::new(Header::new(0, 1, CommandType::Request), payload);
        let result = transport.send(oversized).await;

        assert!(matches!(result, Err(RpcError::Protocol { .. })));
        assert_eq!(transport.pending_requests(), 0);
        assert!(!transport.is_closed());

        let response = transport.send(request(b"after")).await.unwrap();
        assert_eq!(response.payload().as_ref(), b"after");
    }

    #[tokio::test]
    async fn test_close_fails_pending_requests() {
        let addr = spawn_silent_server().await;
        let transport = TcpTransport::connect(addr, Duration::from_secs(5), Duration::from_secs(30), 16)
            .await
            .unwrap();

        let sender = transport.clone();
        let waiting = tokio::spawn(async move { sender.send(request(b"never")).await });

        // Let the request reach the pending table.
        while transport.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }
        transport.close().await;

        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(RpcError::ConnectionClosed(_))));
        assert!(transport.is_closed());

        let after = transport.send(request(b"late")).await;
        assert!(matches!(after, Err(RpcError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn test_client_close_closes_created_transports() {
        let addr = spawn_echo_server().await;
        let client = TcpTransportClient::new();
        let transport = client
            .create_transport(addr, Duration::from_secs(5))
            .await
            .unwrap();

        client.close().await;
        assert!(transport.is_closed());
    }
}
