//! Connection ring manager — keeps per-service rings in step with membership.
//!
//! Membership events are consumed by one event loop and applied one at a
//! time under the membership lock. The request path calls [`select`], which
//! only touches the ring table and the ring's own lock, so a slow connect
//! never stalls request traffic.
//!
//! Suspect connections are evicted lazily: the request path flags them, and
//! the next selection that lands on one removes it from its ring and closes
//! it.
//!
//! [`select`]: ConnectionRingManager::select

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use cairn_core::config::PoolConfig;
use cairn_core::{MembershipEvent, ProviderAddr, ProviderMetadata, ServiceKey};

use crate::bus::{MembershipBus, Subscription};
use crate::connector::{ConnectError, Connector};
use crate::registry::{ConnectionGroup, ConnectionRegistry};
use crate::response::ResponseTable;
use crate::ring::RingError;
use crate::ring_table::ServiceRingTable;
use crate::snapshot::PoolSnapshot;
use crate::wrapper::ConnectionWrapper;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoProviderReason {
    /// The ring exists but holds nothing.
    EmptyRing,
    /// The ring emptied between the emptiness check and retrieval.
    RaceEmptied,
    /// Every connection in the ring is suspect.
    AllSuspect,
}

impl fmt::Display for NoProviderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoProviderReason::EmptyRing => f.write_str("ring is empty"),
            NoProviderReason::RaceEmptied => f.write_str("ring emptied during selection"),
            NoProviderReason::AllSuspect => f.write_str("all connections are suspect"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no providers ever announced for {0}")]
    UnknownService(ServiceKey),

    #[error("no available provider for {key}: {reason}")]
    NoAvailableProvider {
        key: ServiceKey,
        reason: NoProviderReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    #[error("connection ring manager has been shut down")]
    ShutDown,
}

// ── Manager ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Lifecycle {
    subscription_id: Option<u64>,
    event_loop: Option<JoinHandle<()>>,
}

pub struct ConnectionRingManager<C: Connector> {
    config: PoolConfig,
    connector: C,
    bus: MembershipBus,
    responses: ResponseTable,
    rings: ServiceRingTable,
    /// Membership lock. Serialises CREATE and REMOVE handling.
    registry: Mutex<ConnectionRegistry>,
    group: ConnectionGroup,
    lifecycle: parking_lot::Mutex<Lifecycle>,
    shut_down: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl<C: Connector> ConnectionRingManager<C> {
    pub fn new(
        config: PoolConfig,
        connector: C,
        bus: MembershipBus,
        responses: ResponseTable,
    ) -> Self {
        let group = ConnectionGroup::new();
        let registry = ConnectionRegistry::new(group.clone(), responses.clone());
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            connector,
            bus,
            responses,
            rings: ServiceRingTable::new(),
            registry: Mutex::new(registry),
            group,
            lifecycle: parking_lot::Mutex::new(Lifecycle::default()),
            shut_down: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Subscribe to the membership bus and start the event loop.
    ///
    /// A second call while running does nothing. Fails once `shutdown` ran.
    pub fn init(self: &Arc<Self>) -> Result<(), ManagerError> {
        let mut lifecycle = self.lifecycle.lock();
        if self.is_shut_down() {
            return Err(ManagerError::ShutDown);
        }
        if lifecycle.event_loop.is_some() {
            return Ok(());
        }

        let subscription = self.bus.subscribe();
        lifecycle.subscription_id = Some(subscription.id());

        let manager = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        lifecycle.event_loop = Some(tokio::spawn(async move {
            manager.event_loop(subscription, shutdown_rx).await;
        }));

        tracing::info!(
            connect_timeout_ms = self.config.connect_timeout_ms,
            republish_delay_ms = self.config.republish_delay_ms,
            "connection ring manager started"
        );
        Ok(())
    }

    async fn event_loop(
        self: Arc<Self>,
        mut subscription: Subscription,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = subscription.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        tracing::debug!("membership event loop stopped");
    }

    /// Apply one membership event.
    ///
    /// A CREATE that fails to connect goes back on the bus after
    /// `republish_delay`; it is never retried inline.
    pub async fn handle_event(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Create {
                address,
                key,
                provider,
            } => {
                if let Err(e) = self.handle_create(&address, &key, &provider).await {
                    tracing::warn!(
                        addr = %address,
                        key = %key,
                        error = %e,
                        retry_in_ms = self.config.republish_delay_ms,
                        "connect failed, re-publishing create"
                    );
                    self.bus.publish_after(
                        MembershipEvent::Create {
                            address,
                            key,
                            provider,
                        },
                        self.config.republish_delay(),
                    );
                }
            }
            MembershipEvent::Remove { address, key } => {
                self.handle_remove(&address, &key).await;
            }
        }
    }

    async fn handle_create(
        &self,
        address: &ProviderAddr,
        key: &ServiceKey,
        provider: &ProviderMetadata,
    ) -> Result<Arc<ConnectionWrapper>, ConnectError> {
        // Subscribe before checking the flag so a concurrent shutdown is
        // seen one way or the other.
        let mut cancel = self.shutdown_tx.subscribe();
        let mut registry = self.registry.lock().await;
        if self.is_shut_down() {
            return Err(ConnectError::Cancelled(address.clone()));
        }

        let timeout = self.config.connect_timeout();
        let wrapper = tokio::select! {
            result = registry.get_or_create(address, provider, &self.connector, timeout) => result?,
            _ = cancel.recv() => return Err(ConnectError::Cancelled(address.clone())),
        };

        let ring = self.rings.get_or_create(key);
        ring.insert(Arc::clone(&wrapper));
        tracing::info!(
            addr = %address,
            key = %key,
            connection_id = wrapper.connection().id(),
            ref_count = wrapper.ref_count(),
            ring_len = ring.len(),
            "provider added to ring"
        );
        Ok(wrapper)
    }

    /// Unbind every connection to `address` from the ring for `key`.
    ///
    /// A connection is only closed once no ring binds it any more; its
    /// pending requests fail at that point. Returns how many ring entries
    /// were removed.
    async fn handle_remove(&self, address: &ProviderAddr, key: &ServiceKey) -> usize {
        let mut registry = self.registry.lock().await;
        let Some(ring) = self.rings.get(key) else {
            tracing::debug!(addr = %address, key = %key, "remove for unknown service ignored");
            return 0;
        };

        let mut removed = 0;
        let mut it = ring.iter();
        while let Some(wrapper) = it.next() {
            if !wrapper.matches(address) || !it.remove() {
                continue;
            }
            removed += 1;

            let ref_count = wrapper.dec();
            if ref_count == 0 {
                registry.remove(&wrapper);
                let failed = self.responses.fail_connection(wrapper.connection().id());
                tracing::info!(
                    addr = %address,
                    key = %key,
                    connection_id = wrapper.connection().id(),
                    failed_requests = failed,
                    "provider removed, connection released"
                );
            } else {
                tracing::info!(
                    addr = %address,
                    key = %key,
                    connection_id = wrapper.connection().id(),
                    ref_count,
                    "provider removed from ring, connection still shared"
                );
            }
        }

        if removed == 0 {
            tracing::debug!(addr = %address, key = %key, "remove matched nothing");
        }
        removed
    }

    // ── Selection ─────────────────────────────────────────────────────────────

    /// Pick a connection for one request to `key`, round-robin.
    ///
    /// If the connection the cursor lands on is suspect, it is evicted and
    /// the last healthy connection in ring order is returned instead.
    pub fn select(&self, key: &ServiceKey) -> Result<Arc<ConnectionWrapper>, SelectError> {
        let ring = self
            .rings
            .get(key)
            .ok_or_else(|| SelectError::UnknownService(key.clone()))?;
        if ring.is_empty() {
            return Err(no_provider(key, NoProviderReason::EmptyRing));
        }
        let selected = match ring.ring() {
            Ok(wrapper) => wrapper,
            Err(RingError::Empty) => return Err(no_provider(key, NoProviderReason::RaceEmptied)),
        };
        if !selected.is_maybe_down() {
            return Ok(selected);
        }

        let mut fallback = None;
        let mut it = ring.iter();
        while let Some(wrapper) = it.next() {
            if Arc::ptr_eq(&wrapper, &selected) {
                if it.remove() {
                    self.evict(key, &wrapper);
                }
            } else if !wrapper.is_maybe_down() {
                fallback = Some(wrapper);
            }
        }
        fallback.ok_or_else(|| no_provider(key, NoProviderReason::AllSuspect))
    }

    fn evict(&self, key: &ServiceKey, wrapper: &ConnectionWrapper) {
        if !wrapper.close() {
            return;
        }
        let failed = self.responses.fail_connection(wrapper.connection().id());
        tracing::info!(
            key = %key,
            addr = %wrapper.connection().remote(),
            connection_id = wrapper.connection().id(),
            failed_requests = failed,
            "connection maybe down, evicted from ring"
        );
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Stop consuming membership and tear down every connection.
    ///
    /// In-flight connects are cancelled and waiting requests fail. Calling
    /// it again does nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());

        let event_loop = {
            let mut lifecycle = self.lifecycle.lock();
            if let Some(id) = lifecycle.subscription_id.take() {
                self.bus.unsubscribe(id);
            }
            lifecycle.event_loop.take()
        };

        {
            let mut registry = self.registry.lock().await;
            self.rings.clear();
            let closed = registry.close_all();
            let failed = self.responses.fail_all();
            tracing::info!(
                closed_connections = closed,
                failed_requests = failed,
                "connection ring manager shut down"
            );
        }

        if let Some(handle) = event_loop {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "membership event loop ended abnormally");
            }
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn bus(&self) -> &MembershipBus {
        &self.bus
    }

    pub fn responses(&self) -> &ResponseTable {
        &self.responses
    }

    pub fn rings(&self) -> &ServiceRingTable {
        &self.rings
    }

    /// Open wrappers in the registry. Waits for the membership lock.
    pub async fn registered(&self) -> Vec<Arc<ConnectionWrapper>> {
        self.registry.lock().await.live()
    }

    /// Point-in-time view for logging. Never waits for the membership lock;
    /// the registry size is omitted if it is held.
    pub fn snapshot(&self) -> PoolSnapshot {
        let registered = self.registry.try_lock().ok().map(|r| r.live_len());
        PoolSnapshot::capture(&self.rings, registered, self.group.open_count())
    }
}

fn no_provider(key: &ServiceKey, reason: NoProviderReason) -> SelectError {
    SelectError::NoAvailableProvider {
        key: key.clone(),
        reason,
    }
}
