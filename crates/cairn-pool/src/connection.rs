//! One physical connection to a provider.
//!
//! A connection owns two tasks: a writer draining an outbound frame queue
//! into the socket, and a reader decoding response frames and handing them
//! to the response table. `close()` aborts both, which drops the socket
//! halves and closes the TCP stream. Close is idempotent and synchronous,
//! so the membership path and the request path can both call it freely.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cairn_core::wire::{encode_frame, FrameHeader, FrameKind, WireError, FRAME_HEADER_LEN};
use cairn_core::ProviderAddr;

use crate::response::ResponseTable;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(u64),

    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),
}

struct ConnectionInner {
    id: u64,
    remote: ProviderAddr,
    peer: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    /// Set by the I/O tasks when the peer hangs up or the socket errors.
    hung_up: Arc<AtomicBool>,
}

/// Handle to a live connection. Clones share the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Take ownership of a connected stream and start its I/O tasks.
    pub fn spawn(stream: TcpStream, remote: ProviderAddr, responses: ResponseTable) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let hung_up = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(reader_task(
            read_half,
            id,
            remote.clone(),
            responses,
            hung_up.clone(),
        ));
        let writer = tokio::spawn(writer_task(write_half, id, outbound_rx, hung_up.clone()));

        Self {
            inner: Arc::new(ConnectionInner {
                id,
                remote,
                peer,
                outbound,
                tasks: Mutex::new(vec![reader, writer]),
                closed: AtomicBool::new(false),
                hung_up,
            }),
        }
    }

    /// A connection with no socket behind it. Sends fail; close works.
    #[cfg(test)]
    pub(crate) fn detached(remote: ProviderAddr) -> Self {
        let (outbound, _) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                remote,
                peer: None,
                outbound,
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                hung_up: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The address this connection was opened for, as announced.
    pub fn remote(&self) -> &ProviderAddr {
        &self.inner.remote
    }

    /// Resolved socket address of the peer, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Hostname-string plus port comparison against the announced address.
    pub fn matches(&self, addr: &ProviderAddr) -> bool {
        self.inner.remote == *addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// True once the peer hung up or the socket failed.
    pub fn is_hung_up(&self) -> bool {
        self.inner.hung_up.load(Ordering::Acquire)
    }

    /// Queue one frame for the writer task.
    pub fn send(&self, kind: FrameKind, request_id: u64, payload: &[u8]) -> Result<(), SendError> {
        if self.is_closed() || self.is_hung_up() {
            return Err(SendError::Closed(self.id()));
        }
        let frame = encode_frame(kind, request_id, payload)?;
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| SendError::Closed(self.id()))
    }

    /// Disconnect and close. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!(
            connection_id = self.id(),
            addr = %self.inner.remote,
            "connection closed"
        );
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .field("hung_up", &self.is_hung_up())
            .finish()
    }
}

// ── Frame I/O ─────────────────────────────────────────────────────────────────

/// Read one frame. `Ok(None)` on a clean EOF between frames; EOF inside a
/// frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(FrameHeader, Bytes)>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        match reader.read(&mut head[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {filled} of {FRAME_HEADER_LEN} header bytes"),
                )
                .into())
            }
            n => filled += n,
        }
    }
    let header = FrameHeader::decode(&head)?;

    let mut payload = vec![0u8; header.payload_len()];
    reader.read_exact(&mut payload).await?;
    Ok(Some((header, Bytes::from(payload))))
}

/// Encode and write one frame.
pub async fn write_frame<W>(
    writer: &mut W,
    kind: FrameKind,
    request_id: u64,
    payload: &[u8],
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(kind, request_id, payload)?;
    writer.write_all(&frame).await?;
    Ok(())
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn reader_task(
    read_half: OwnedReadHalf,
    connection_id: u64,
    remote: ProviderAddr,
    responses: ResponseTable,
    hung_up: Arc<AtomicBool>,
) {
    if let Err(e) = read_loop(read_half, connection_id, &responses).await {
        tracing::warn!(connection_id, addr = %remote, error = %e, "connection read failed");
    } else {
        tracing::debug!(connection_id, addr = %remote, "peer closed connection");
    }
    hung_up.store(true, Ordering::Release);
    responses.fail_connection(connection_id);
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    connection_id: u64,
    responses: &ResponseTable,
) -> anyhow::Result<()> {
    while let Some((header, payload)) = read_frame(&mut read_half).await? {
        match header.frame_kind()? {
            FrameKind::Response => {
                tracing::trace!(
                    connection_id,
                    request_id = header.request_id(),
                    len = payload.len(),
                    "response frame"
                );
                responses.deliver(header.request_id(), payload);
            }
            FrameKind::Request => {
                tracing::debug!(
                    connection_id,
                    request_id = header.request_id(),
                    "unexpected request frame from provider, ignoring"
                );
            }
        }
    }
    Ok(())
}

async fn writer_task(
    mut write_half: OwnedWriteHalf,
    connection_id: u64,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    hung_up: Arc<AtomicBool>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            tracing::warn!(connection_id, error = %e, "connection write failed");
            hung_up.store(true, Ordering::Release);
            return;
        }
    }
    let _ = write_half.shutdown().await;
}
