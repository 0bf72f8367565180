//! TCP transport server.
//!
//! Accepts connections and hands every decoded request to the
//! [`RequestHandlerRegistry`]. Requests on one connection are processed
//! concurrently; their responses go back through a per-connection writer
//! task, so a slow method never blocks the replies of a fast one.
//!
//! # Shutdown
//!
//! [`TransportServer::stop`] signals the accept loop through a oneshot and
//! every connection through a shared watch channel, mirroring how the
//! listener is torn down and how each handler notices.

use super::TransportServer;
use crate::config::{ProtocolConfig, TransportConfig};
use crate::protocol::{check_frame_size, read_command, write_frame, Command, FaultKind, Header, RpcFault};
use crate::server::RequestHandlerRegistry;
use crate::{Result, RpcError};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Running {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Running {
    fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
        self.accept_task.abort();
    }
}

/// Serves requests over TCP until stopped.
pub struct TcpTransportServer {
    max_connections: usize,
    state: Mutex<Option<Running>>,
}

impl TcpTransportServer {
    pub fn new() -> Self {
        Self::with_max_connections(TransportConfig::MAX_CONNECTIONS)
    }

    pub fn with_max_connections(max_connections: usize) -> Self {
        Self {
            max_connections,
            state: Mutex::new(None),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn accept_loop(
        listener: TcpListener,
        handlers: Arc<RequestHandlerRegistry>,
        max_connections: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Transport server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= max_connections {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr, max_connections
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let handlers = handlers.clone();
                            let conns = active_connections.clone();
                            let conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, peer_addr, handlers, conn_shutdown).await {
                                    debug!("Connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        handlers: Arc<RequestHandlerRegistry>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let (replies, queue) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(Self::write_loop(writer, queue, peer_addr));

        let outcome = loop {
            let command = tokio::select! {
                result = read_command(&mut reader) => {
                    match result {
                        Ok(Some(Ok(command))) => command,
                        Ok(Some(Err(e))) => {
                            warn!("Skipping undecodable frame from {}: {}", peer_addr, e);
                            continue;
                        }
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    writer_task.abort();
                    return Ok(());
                }
            };

            let handlers = handlers.clone();
            let replies = replies.clone();
            tokio::spawn(async move {
                let request = *command.header();
                let response = Self::fit_reply(request, handlers.dispatch(command).await);
                // The connection may be gone; the reply is then dropped.
                let _ = replies.send(response.encode());
            });
        };

        // Let replies of requests still running drain before closing.
        drop(replies);
        outcome
    }

    /// A reply too large for one frame becomes a fault for that request alone.
    fn fit_reply(request: Header, response: Command) -> Command {
        if check_frame_size(response.encoded_len()).is_ok() {
            return response;
        }
        let message = format!(
            "result of {} bytes exceeds maximum frame size {}",
            response.encoded_len(),
            ProtocolConfig::MAX_FRAME_SIZE
        );
        warn!("Replacing reply to request {}: {}", request.request_id, message);
        RpcFault::new(FaultKind::Invocation, message).into_command(&request)
    }

    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut queue: mpsc::UnboundedReceiver<Bytes>,
        peer_addr: SocketAddr,
    ) {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!("Reply to {} failed: {}", peer_addr, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    }
}

impl Default for TcpTransportServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportServer for TcpTransportServer {
    async fn start(
        &self,
        handlers: Arc<RequestHandlerRegistry>,
        addr: SocketAddr,
    ) -> Result<SocketAddr> {
        let running = self.state().as_ref().map(|running| running.addr);
        if let Some(running) = running {
            return Err(RpcError::ServerAlreadyRunning {
                addr: running.to_string(),
            });
        }

        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;

        let mut state = self.state();
        if let Some(running) = state.as_ref() {
            return Err(RpcError::ServerAlreadyRunning {
                addr: running.addr.to_string(),
            });
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            handlers,
            self.max_connections,
            shutdown_rx,
            conn_shutdown_rx,
        ));

        *state = Some(Running {
            addr: bound,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            accept_task,
        });

        info!("Transport server listening on {}", bound);
        Ok(bound)
    }

    fn stop(&self) {
        if let Some(running) = self.state().take() {
            debug!("Stopping transport server on {}", running.addr);
            running.shutdown();
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state().as_ref().map(|running| running.addr)
    }
}

impl Drop for TcpTransportServer {
    fn drop(&mut self) {
        self.stop();
    }
}
