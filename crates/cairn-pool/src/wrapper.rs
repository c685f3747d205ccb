//! Connection wrapper — a connection plus the bookkeeping the pool needs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cairn_core::{ProviderAddr, ProviderMetadata};

use crate::connection::Connection;

/// One pooled connection, shared by every ring whose provider lives at
/// the same address.
///
/// `ref_count` counts service-key bindings and is only touched under the
/// manager's membership lock. `maybe_down` is raised by the request path
/// and consumed by selection, which evicts the wrapper lazily.
#[derive(Debug)]
pub struct ConnectionWrapper {
    connection: Connection,
    provider: ProviderMetadata,
    ref_count: AtomicUsize,
    maybe_down: AtomicBool,
}

impl ConnectionWrapper {
    pub fn new(connection: Connection, provider: ProviderMetadata) -> Self {
        Self {
            connection,
            provider,
            ref_count: AtomicUsize::new(0),
            maybe_down: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Provider metadata as of connection time.
    pub fn provider(&self) -> &ProviderMetadata {
        &self.provider
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn inc(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Saturates at zero. Returns the new count.
    pub(crate) fn dec(&self) -> usize {
        let prev = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Flag this connection as likely failed. The next selection that
    /// lands on it evicts it.
    pub fn mark_maybe_down(&self) {
        if !self.maybe_down.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                connection_id = self.connection.id(),
                addr = %self.connection.remote(),
                "connection marked maybe down"
            );
        }
    }

    /// Suspect if flagged, or if the socket is already gone.
    pub fn is_maybe_down(&self) -> bool {
        self.maybe_down.load(Ordering::Acquire)
            || self.connection.is_hung_up()
            || self.connection.is_closed()
    }

    pub fn matches(&self, addr: &ProviderAddr) -> bool {
        self.connection.matches(addr)
    }

    /// Close the underlying connection. True only for the closing call.
    pub fn close(&self) -> bool {
        self.connection.close()
    }
}
