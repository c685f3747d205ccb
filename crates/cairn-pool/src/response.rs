//! Response correlation — matches inbound responses to waiting callers.
//!
//! Each outgoing request registers a pending slot keyed by a fresh request
//! id and remembers which connection it went out on. The connection's
//! reader delivers responses by id. When a connection goes away, every
//! request still waiting on it is failed instead of left to time out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;

pub type ResponseResult = Result<Bytes, ResponseError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("connection {0} went away before the response arrived")]
    ConnectionLost(u64),

    #[error("response table shut down")]
    Shutdown,
}

struct Pending {
    connection_id: u64,
    tx: oneshot::Sender<ResponseResult>,
}

/// Pending requests by request id. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ResponseTable {
    pending: Arc<DashMap<u64, Pending>>,
    next_id: Arc<AtomicU64>,
}

impl ResponseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a request id for a request sent on `connection_id`.
    pub fn register(&self, connection_id: u64) -> (u64, oneshot::Receiver<ResponseResult>) {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, Pending { connection_id, tx });
        (request_id, rx)
    }

    /// Hand a response to its caller. Returns false if nobody is waiting.
    pub fn deliver(&self, request_id: u64, payload: Bytes) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, pending)) => {
                // Receiver may have been dropped by a caller that gave up.
                let _ = pending.tx.send(Ok(payload));
                true
            }
            None => {
                tracing::info!(
                    request_id,
                    "received response, but request was not found, looks like timeout"
                );
                false
            }
        }
    }

    /// Forget a request the caller no longer waits for.
    pub fn cancel(&self, request_id: u64) -> bool {
        self.pending.remove(&request_id).is_some()
    }

    /// Fail every request waiting on `connection_id`. Returns how many.
    pub fn fail_connection(&self, connection_id: u64) -> usize {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.value().connection_id == connection_id)
            .map(|entry| *entry.key())
            .collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.tx.send(Err(ResponseError::ConnectionLost(connection_id)));
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::debug!(connection_id, failed, "failed pending requests on lost connection");
        }
        failed
    }

    /// Fail everything. Used on shutdown.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.tx.send(Err(ResponseError::Shutdown));
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
