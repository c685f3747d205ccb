//! cairn-pool — per-service connection rings for the RPC consumer side.
//!
//! The manager keeps one ring of live connections per service key, fed by
//! membership events, and hands the request path a connection per call in
//! round-robin order.

pub mod bus;
pub mod connection;
pub mod connector;
pub mod invoker;
pub mod manager;
pub mod registry;
pub mod response;
pub mod ring;
pub mod ring_table;
pub mod snapshot;
pub mod wrapper;

pub use bus::{MembershipBus, Subscription};
pub use connection::{Connection, SendError};
pub use connector::{ConnectError, Connector, TcpConnector};
pub use invoker::{InvokeError, Invoker};
pub use manager::{ConnectionRingManager, ManagerError, NoProviderReason, SelectError};
pub use registry::{ConnectionGroup, ConnectionRegistry};
pub use response::{ResponseError, ResponseTable};
pub use ring::{Ring, RingError, RingIter};
pub use ring_table::{ConnectionRing, ServiceRingTable};
pub use snapshot::PoolSnapshot;
pub use wrapper::ConnectionWrapper;
