//! cairn-core — shared identity types, membership events, wire format and config.
//! All other Cairn crates depend on this one.

pub mod config;
pub mod membership;
pub mod service;
pub mod wire;

pub use membership::{EventKind, MembershipEvent};
pub use service::{ParseError, ProviderAddr, ProviderMetadata, ServiceKey};
