//! Pending-request table of one transport.
//!
//! Senders insert an entry per request id, the connection's read loop removes
//! and completes it when the matching response arrives, and a sender whose
//! timeout fires removes it itself. Whoever removes the entry first owns the
//! one-shot completion, so every request is resolved exactly once and a late
//! response finds nothing to complete.

use crate::protocol::Command;
use crate::{Result, RpcError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

type Completion = oneshot::Sender<Result<Command>>;

#[derive(Default)]
struct PendingState {
    closed: bool,
    waiters: HashMap<u32, Completion>,
}

/// Concurrency-safe map of request id to waiting caller.
pub struct InFlightRequests {
    next_id: AtomicU32,
    state: Mutex<PendingState>,
    permits: Arc<Semaphore>,
    peer: String,
}

/// A registered request awaiting its response.
///
/// Holds one back-pressure permit until dropped.
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: u32,
    receiver: oneshot::Receiver<Result<Command>>,
    _permit: OwnedSemaphorePermit,
}

impl InFlightRequests {
    /// Create a table admitting at most `max_in_flight` concurrent requests.
    pub fn new(peer: impl Into<String>, max_in_flight: usize) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            state: Mutex::new(PendingState::default()),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            peer: peer.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> RpcError {
        RpcError::ConnectionClosed(self.peer.clone())
    }

    /// Reserve a fresh request id and its completion slot.
    ///
    /// Waits for a back-pressure permit when the table is full. Fails with
    /// `ConnectionClosed` once [`fail_all`](Self::fail_all) has run.
    pub async fn register(&self) -> Result<PendingRequest> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.closed_error())?;

        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if state.closed {
            return Err(self.closed_error());
        }

        // Ids wrap; 0 stays reserved and ids still held by a slow request are skipped.
        let request_id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            if candidate != 0 && !state.waiters.contains_key(&candidate) {
                break candidate;
            }
        };
        state.waiters.insert(request_id, tx);

        Ok(PendingRequest {
            request_id,
            receiver: rx,
            _permit: permit,
        })
    }

    /// Deliver a response to the caller waiting on its request id.
    ///
    /// Returns `false` when nobody is waiting (unknown, timed out or already
    /// completed id); the response is dropped.
    pub fn complete(&self, response: Command) -> bool {
        let waiter = self.lock().waiters.remove(&response.request_id());
        match waiter {
            Some(tx) => {
                // The caller may have stopped listening; nothing else to do.
                let _ = tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Remove a request without completing it (caller gave up).
    pub fn abandon(&self, request_id: u32) -> bool {
        self.lock().waiters.remove(&request_id).is_some()
    }

    /// Close the table and fail every pending request with `ConnectionClosed`.
    ///
    /// Idempotent. Returns how many requests were failed by this call.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<Completion> = {
            let mut state = self.lock();
            state.closed = true;
            state.waiters.drain().map(|(_, tx)| tx).collect()
        };
        self.permits.close();

        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(self.closed_error()));
        }
        if count > 0 {
            debug!("Failed {} pending requests to {}", count, self.peer);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Force the next allocated id (used to exercise wrap-around).
    #[cfg(test)]
    fn set_next_id(&self, id: u32) {
        self.next_id.store(id, Ordering::Relaxed);
    }
}

impl PendingRequest {
    /// Wait for the response. Resolves to `ConnectionClosed` if the table is
    /// torn down without an answer.
    pub async fn wait(self, peer: &str) -> Result<Command> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectionClosed(peer.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandType, Header};

    fn response(request_id: u32) -> Command {
        Command::new(
            Header::new(request_id, 1, CommandType::Response),
            request_id.to_be_bytes().to_vec(),
        )
    }

    #[tokio::test]
    async fn test_register_assigns_distinct_ids() {
        let table = InFlightRequests::new("peer", 8);
        let a = table.register().await.unwrap();
        let b = table.register().await.unwrap();

        assert_ne!(a.request_id, b.request_id);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_delivers_to_matching_waiter_only() {
        let table = InFlightRequests::new("peer", 8);
        let a = table.register().await.unwrap();
        let b = table.register().await.unwrap();
        let (id_a, id_b) = (a.request_id, b.request_id);

        assert!(table.complete(response(id_b)));
        assert!(table.complete(response(id_a)));

        assert_eq!(a.wait("peer").await.unwrap().request_id(), id_a);
        assert_eq!(b.wait("peer").await.unwrap().request_id(), id_b);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_late_response_after_abandon_is_discarded() {
        let table = InFlightRequests::new("peer", 8);
        let pending = table.register().await.unwrap();
        let id = pending.request_id;

        assert!(table.abandon(id));
        assert!(!table.complete(response(id)));
        assert!(!table.abandon(id));
    }

    #[tokio::test]
    async fn test_fail_all_fails_every_waiter_once() {
        let table = InFlightRequests::new("peer", 8);
        let waiters: Vec<_> = futures::future::join_all((0..3).map(|_| table.register()))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let ids: Vec<u32> = waiters.iter().map(|w| w.request_id).collect();

        assert_eq!(table.fail_all(), 3);
        assert_eq!(table.fail_all(), 0);

        for waiter in waiters {
            assert!(matches!(
                waiter.wait("peer").await,
                Err(RpcError::ConnectionClosed(_))
            ));
        }
        for id in ids {
            assert!(!table.complete(response(id)));
        }
    }

    #[tokio::test]
    async fn test_register_after_close_fails() {
        let table = InFlightRequests::new("peer", 8);
        table.fail_all();

        assert!(table.is_closed());
        assert!(matches!(
            table.register().await,
            Err(RpcError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_wrapped_id_skips_ids_still_in_flight() {
        let table = InFlightRequests::new("peer", 8);
        table.set_next_id(u32::MAX);
        let first = table.register().await.unwrap();
        assert_eq!(first.request_id, u32::MAX);

        table.set_next_id(u32::MAX);
        let second = table.register().await.unwrap();
        assert_eq!(second.request_id, 1);
    }

    #[tokio::test]
    async fn test_permit_released_when_request_dropped() {
        let table = InFlightRequests::new("peer", 1);
        let first = table.register().await.unwrap();

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            table.register(),
        )
        .await;
        assert!(blocked.is_err());

        table.abandon(first.request_id);
        drop(first);
        assert!(table.register().await.is_ok());
    }
}
