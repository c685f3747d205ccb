//! Connection registry — one live connection per provider address.
//!
//! Different service keys frequently resolve to the same provider process.
//! The registry makes sure they share one physical connection instead of
//! each opening their own. Lookups compare the announced host string and
//! port, never resolved IPs.
//!
//! The registry is not synchronised on its own: the manager keeps it behind
//! the membership lock so the find-then-connect sequence is atomic with
//! respect to other CREATE and REMOVE handling.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use cairn_core::{ProviderAddr, ProviderMetadata};

use crate::connection::Connection;
use crate::connector::{ConnectError, Connector};
use crate::response::ResponseTable;
use crate::wrapper::ConnectionWrapper;

// ── Group ─────────────────────────────────────────────────────────────────────

/// Every connection the pool opened, for bulk teardown on shutdown.
///
/// Independent of ring and registry membership: a connection that fell out
/// of both is still closed here. Closed entries are dropped lazily.
#[derive(Clone, Default)]
pub struct ConnectionGroup {
    connections: Arc<DashMap<u64, Connection>>,
}

impl ConnectionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: Connection) {
        self.connections.retain(|_, c| !c.is_closed());
        self.connections.insert(connection.id(), connection);
    }

    /// Connections not yet closed.
    pub fn open_count(&self) -> usize {
        self.connections.iter().filter(|c| !c.is_closed()).count()
    }

    /// Close everything. Returns how many were still open.
    pub fn close_all(&self) -> usize {
        let connections: Vec<Connection> =
            self.connections.iter().map(|c| c.value().clone()).collect();
        self.connections.clear();
        connections.iter().filter(|c| c.close()).count()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub struct ConnectionRegistry {
    wrappers: Vec<Arc<ConnectionWrapper>>,
    group: ConnectionGroup,
    responses: ResponseTable,
}

impl ConnectionRegistry {
    pub fn new(group: ConnectionGroup, responses: ResponseTable) -> Self {
        Self {
            wrappers: Vec::new(),
            group,
            responses,
        }
    }

    /// Find the wrapper connected to `addr`.
    ///
    /// Suspect wrappers (closed, hung up, or flagged maybe-down) are pruned
    /// and closed first, so a dead socket is never handed to a new binding.
    pub fn find_by_address(&mut self, addr: &ProviderAddr) -> Option<Arc<ConnectionWrapper>> {
        self.prune_suspect();
        self.wrappers.iter().find(|w| w.matches(addr)).cloned()
    }

    /// Reuse the connection to `addr`, or open one.
    ///
    /// Either way the returned wrapper's ref count has been bumped by one.
    pub async fn get_or_create<C: Connector>(
        &mut self,
        addr: &ProviderAddr,
        provider: &ProviderMetadata,
        connector: &C,
        timeout: Duration,
    ) -> Result<Arc<ConnectionWrapper>, ConnectError> {
        if let Some(wrapper) = self.find_by_address(addr) {
            let ref_count = wrapper.inc();
            tracing::debug!(
                addr = %addr,
                connection_id = wrapper.connection().id(),
                ref_count,
                "reusing pooled connection"
            );
            return Ok(wrapper);
        }

        let connection = connector.connect(addr, timeout).await?;
        self.group.add(connection.clone());

        let wrapper = Arc::new(ConnectionWrapper::new(connection, provider.clone()));
        wrapper.inc();
        self.wrappers.push(Arc::clone(&wrapper));
        Ok(wrapper)
    }

    /// Drop `wrapper` from the registry and close its connection.
    /// Returns whether it was still registered.
    pub fn remove(&mut self, wrapper: &Arc<ConnectionWrapper>) -> bool {
        let before = self.wrappers.len();
        self.wrappers.retain(|w| !Arc::ptr_eq(w, wrapper));
        wrapper.close();
        self.wrappers.len() != before
    }

    /// Forget every wrapper and close every connection ever opened.
    pub fn close_all(&mut self) -> usize {
        self.wrappers.clear();
        self.group.close_all()
    }

    /// Registered wrappers whose connection is still open.
    ///
    /// Wrappers closed by suspect eviction linger until the next lookup
    /// prunes them; they are left out here.
    pub fn live(&self) -> Vec<Arc<ConnectionWrapper>> {
        self.wrappers
            .iter()
            .filter(|w| !w.connection().is_closed())
            .cloned()
            .collect()
    }

    pub fn live_len(&self) -> usize {
        self.wrappers
            .iter()
            .filter(|w| !w.connection().is_closed())
            .count()
    }

    /// Entry count, including closed wrappers not yet pruned.
    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    fn prune_suspect(&mut self) {
        let (suspect, healthy): (Vec<_>, Vec<_>) = self
            .wrappers
            .drain(..)
            .partition(|w| w.is_maybe_down());
        self.wrappers = healthy;

        for wrapper in suspect {
            // Already-closed wrappers had their requests failed by whoever
            // closed them.
            if wrapper.close() {
                let failed = self.responses.fail_connection(wrapper.connection().id());
                tracing::info!(
                    addr = %wrapper.connection().remote(),
                    connection_id = wrapper.connection().id(),
                    failed_requests = failed,
                    "suspect connection pruned from registry"
                );
            } else {
                tracing::debug!(
                    connection_id = wrapper.connection().id(),
                    "closed connection pruned from registry"
                );
            }
        }
    }
}
