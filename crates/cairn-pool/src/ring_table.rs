//! Service ring table — ServiceKey → ring of pooled connections.
//!
//! Rings are created on the first CREATE for a key and never deleted while
//! the manager runs; an empty ring means "known service, no providers".

use std::sync::Arc;

use dashmap::DashMap;

use cairn_core::ServiceKey;

use crate::ring::Ring;
use crate::wrapper::ConnectionWrapper;

pub type ConnectionRing = Ring<Arc<ConnectionWrapper>>;

#[derive(Clone, Default)]
pub struct ServiceRingTable {
    rings: Arc<DashMap<ServiceKey, Arc<ConnectionRing>>>,
}

impl ServiceRingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ring for `key`, if any CREATE for it was ever handled.
    ///
    /// The shard guard is released before returning.
    pub fn get(&self, key: &ServiceKey) -> Option<Arc<ConnectionRing>> {
        self.rings.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn get_or_create(&self, key: &ServiceKey) -> Arc<ConnectionRing> {
        let ring = self
            .rings
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(key = %key, "created service ring");
                Arc::new(Ring::new())
            });
        Arc::clone(ring.value())
    }

    pub fn keys(&self) -> Vec<ServiceKey> {
        self.rings.iter().map(|r| r.key().clone()).collect()
    }

    /// Every (key, ring) pair, cloned out of the map.
    pub fn entries(&self) -> Vec<(ServiceKey, Arc<ConnectionRing>)> {
        self.rings
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    pub fn clear(&self) {
        self.rings.clear();
    }
}
