//! Request path — one request/response exchange over a pooled connection.
//!
//! The invoker never retries. A connection that fails to carry a request
//! is flagged maybe-down so the next selection evicts it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use cairn_core::wire::FrameKind;
use cairn_core::ServiceKey;

use crate::connection::SendError;
use crate::connector::Connector;
use crate::manager::{ConnectionRingManager, SelectError};
use crate::response::ResponseError;
use crate::wrapper::ConnectionWrapper;

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("send failed: {0}")]
    Send(#[from] SendError),

    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout { request_id: u64, timeout: Duration },

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error("response channel dropped")]
    Dropped,
}

pub struct Invoker<C: Connector> {
    manager: Arc<ConnectionRingManager<C>>,
    default_timeout: Duration,
}

impl<C: Connector> Clone for Invoker<C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            default_timeout: self.default_timeout,
        }
    }
}

impl<C: Connector> Invoker<C> {
    pub fn new(manager: Arc<ConnectionRingManager<C>>) -> Self {
        let default_timeout = manager.config().request_timeout();
        Self {
            manager,
            default_timeout,
        }
    }

    /// Send `payload` to some provider of `key` and wait for its response.
    ///
    /// The timeout is `timeout` if given, else the provider's announced
    /// timeout, else the pool default.
    pub async fn invoke(
        &self,
        key: &ServiceKey,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Bytes, InvokeError> {
        let wrapper = self.manager.select(key)?;
        let timeout = timeout.unwrap_or_else(|| self.timeout_for(&wrapper));
        let connection = wrapper.connection();
        let responses = self.manager.responses();

        let (request_id, rx) = responses.register(connection.id());
        if let Err(e) = connection.send(FrameKind::Request, request_id, payload) {
            responses.cancel(request_id);
            wrapper.mark_maybe_down();
            return Err(e.into());
        }
        tracing::trace!(
            key = %key,
            request_id,
            connection_id = connection.id(),
            len = payload.len(),
            "request sent"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(body))) => Ok(body),
            Ok(Ok(Err(e))) => {
                if matches!(e, ResponseError::ConnectionLost(_)) {
                    wrapper.mark_maybe_down();
                }
                Err(e.into())
            }
            Ok(Err(_)) => Err(InvokeError::Dropped),
            Err(_) => {
                responses.cancel(request_id);
                wrapper.mark_maybe_down();
                tracing::debug!(
                    key = %key,
                    request_id,
                    connection_id = connection.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(InvokeError::Timeout {
                    request_id,
                    timeout,
                })
            }
        }
    }

    fn timeout_for(&self, wrapper: &ConnectionWrapper) -> Duration {
        match wrapper.provider().timeout_ms {
            0 => self.default_timeout,
            ms => Duration::from_millis(ms),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionRingManager<C>> {
        &self.manager
    }
}
