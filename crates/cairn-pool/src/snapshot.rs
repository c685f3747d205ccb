//! Serialisable point-in-time view of the pool, for logs and diagnostics.

use serde::Serialize;

use crate::ring_table::ServiceRingTable;

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub services: Vec<RingSnapshot>,
    /// Registry size, or `None` if membership handling held the lock.
    pub registered: Option<usize>,
    pub open_connections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RingSnapshot {
    pub key: String,
    pub members: Vec<MemberSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberSnapshot {
    pub connection_id: u64,
    pub address: String,
    pub ref_count: usize,
    pub maybe_down: bool,
}

impl PoolSnapshot {
    pub fn capture(
        rings: &ServiceRingTable,
        registered: Option<usize>,
        open_connections: usize,
    ) -> Self {
        let mut services: Vec<RingSnapshot> = rings
            .entries()
            .into_iter()
            .map(|(key, ring)| RingSnapshot {
                key: key.to_string(),
                members: ring
                    .snapshot()
                    .iter()
                    .map(|w| MemberSnapshot {
                        connection_id: w.connection().id(),
                        address: w.connection().remote().to_string(),
                        ref_count: w.ref_count(),
                        maybe_down: w.is_maybe_down(),
                    })
                    .collect(),
            })
            .collect();
        services.sort_by(|a, b| a.key.cmp(&b.key));

        Self {
            services,
            registered,
            open_connections,
        }
    }

    pub fn total_members(&self) -> usize {
        self.services.iter().map(|s| s.members.len()).sum()
    }
}
