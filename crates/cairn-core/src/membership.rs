//! Membership events — providers appearing and disappearing.
//!
//! Produced by discovery (outside this workspace), carried by the
//! membership bus, consumed by the connection ring manager.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::service::{ProviderAddr, ProviderMetadata, ServiceKey};

/// A membership change for one provider address under one service key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MembershipEvent {
    /// A provider became available for `key` at `address`.
    Create {
        address: ProviderAddr,
        key: ServiceKey,
        provider: ProviderMetadata,
    },

    /// The provider at `address` no longer serves `key`.
    Remove {
        address: ProviderAddr,
        key: ServiceKey,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Remove,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Create => f.write_str("create"),
            EventKind::Remove => f.write_str("remove"),
        }
    }
}

impl MembershipEvent {
    /// CREATE event for a provider, keyed by the provider's own address and service.
    pub fn create(provider: ProviderMetadata) -> Self {
        MembershipEvent::Create {
            address: provider.address.clone(),
            key: provider.service.clone(),
            provider,
        }
    }

    pub fn remove(address: ProviderAddr, key: ServiceKey) -> Self {
        MembershipEvent::Remove { address, key }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            MembershipEvent::Create { .. } => EventKind::Create,
            MembershipEvent::Remove { .. } => EventKind::Remove,
        }
    }

    pub fn address(&self) -> &ProviderAddr {
        match self {
            MembershipEvent::Create { address, .. } | MembershipEvent::Remove { address, .. } => {
                address
            }
        }
    }

    pub fn key(&self) -> &ServiceKey {
        match self {
            MembershipEvent::Create { key, .. } | MembershipEvent::Remove { key, .. } => key,
        }
    }
}
