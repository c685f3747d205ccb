//! Connectors — how the registry opens new physical connections.

use std::future::Future;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;

use cairn_core::config::PoolConfig;
use cairn_core::ProviderAddr;

use crate::connection::Connection;
use crate::response::ResponseTable;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connect to {0} timed out after {1:?}")]
    Timeout(ProviderAddr, Duration),

    #[error("connect to {0} was cancelled")]
    Cancelled(ProviderAddr),

    #[error("connect to {0} failed: {1}")]
    Io(ProviderAddr, std::io::Error),
}

/// Establishes transport connections for the registry.
///
/// Implementations bound the attempt by `timeout`. Cancellation is the
/// caller's business: it drops the future.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        addr: &ProviderAddr,
        timeout: Duration,
    ) -> impl Future<Output = Result<Connection, ConnectError>> + Send;
}

/// Plain TCP connector. Resolves `host:port` on every attempt.
#[derive(Clone)]
pub struct TcpConnector {
    tcp_nodelay: bool,
    keepalive: bool,
    responses: ResponseTable,
}

impl TcpConnector {
    pub fn new(config: &PoolConfig, responses: ResponseTable) -> Self {
        Self {
            tcp_nodelay: config.tcp_nodelay,
            keepalive: config.keepalive,
            responses,
        }
    }

    fn configure(&self, stream: &TcpStream, addr: &ProviderAddr) {
        if let Err(e) = stream.set_nodelay(self.tcp_nodelay) {
            tracing::warn!(addr = %addr, error = %e, "TCP_NODELAY");
        }
        if let Err(e) = SockRef::from(stream).set_keepalive(self.keepalive) {
            tracing::warn!(addr = %addr, error = %e, "SO_KEEPALIVE");
        }
    }
}

impl Connector for TcpConnector {
    fn connect(
        &self,
        addr: &ProviderAddr,
        timeout: Duration,
    ) -> impl Future<Output = Result<Connection, ConnectError>> + Send {
        let addr = addr.clone();
        async move {
            let attempt = TcpStream::connect((addr.host(), addr.port()));
            let stream = match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(ConnectError::Io(addr, e)),
                Err(_) => return Err(ConnectError::Timeout(addr, timeout)),
            };
            self.configure(&stream, &addr);
            tracing::info!(addr = %addr, peer = ?stream.peer_addr().ok(), "connect succeeded");
            Ok(Connection::spawn(stream, addr, self.responses.clone()))
        }
    }
}
