//! Cairn wire format — the frame envelope around every request and response.
//!
//! A frame is a fixed 16-byte header followed by `length` payload bytes.
//! The payload is opaque here; the only thing the connection layer needs
//! from the envelope is the request id used to correlate a response with
//! its waiting caller.
//!
//! Multi-byte fields are big-endian and the header has no padding, so
//! zerocopy can read it straight off the socket buffer without unsafe code.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// First two bytes of every frame.
pub const FRAME_MAGIC: u16 = 0xCA1B;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 0x01;

/// Size of `FrameHeader` on the wire.
pub const FRAME_HEADER_LEN: usize = 16;

/// Maximum payload size in bytes. Larger payloads are rejected on both ends.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

// ── Frame Kind ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Consumer → provider.
    Request = 0x01,
    /// Provider → consumer. Carries the request id it answers.
    Response = 0x02,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Request),
            0x02 => Ok(FrameKind::Response),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(k: FrameKind) -> u8 {
        k as u8
    }
}

// ── Frame Header ──────────────────────────────────────────────────────────────

/// Header preceding every payload.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct FrameHeader {
    /// Always `FRAME_MAGIC`. Anything else means the stream is out of sync.
    pub magic: U16<BigEndian>,

    /// Always `FRAME_VERSION` for now.
    pub version: u8,

    /// `FrameKind` byte.
    pub kind: u8,

    /// Caller-assigned id, echoed back unchanged in the response.
    pub request_id: U64<BigEndian>,

    /// Payload length in bytes, not including this header.
    pub length: U32<BigEndian>,
}

assert_eq_size!(FrameHeader, [u8; FRAME_HEADER_LEN]);

impl FrameHeader {
    pub fn new(kind: FrameKind, request_id: u64, length: usize) -> Result<Self, WireError> {
        if length > MAX_FRAME_PAYLOAD {
            return Err(WireError::PayloadTooLarge(length));
        }
        Ok(Self {
            magic: U16::new(FRAME_MAGIC),
            version: FRAME_VERSION,
            kind: kind.into(),
            request_id: U64::new(request_id),
            length: U32::new(length as u32),
        })
    }

    /// Parse and validate a header read off the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let header = Self::read_from_prefix(bytes).ok_or(WireError::Truncated(bytes.len()))?;
        if header.magic.get() != FRAME_MAGIC {
            return Err(WireError::BadMagic(header.magic.get()));
        }
        if header.version != FRAME_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        FrameKind::try_from(header.kind)?;
        if header.payload_len() > MAX_FRAME_PAYLOAD {
            return Err(WireError::PayloadTooLarge(header.payload_len()));
        }
        Ok(header)
    }

    /// Frame kind. Headers built by `new` or `decode` always hold a valid kind.
    pub fn frame_kind(&self) -> Result<FrameKind, WireError> {
        FrameKind::try_from(self.kind)
    }

    pub fn request_id(&self) -> u64 {
        self.request_id.get()
    }

    pub fn payload_len(&self) -> usize {
        self.length.get() as usize
    }
}

/// Encode a complete frame (header + payload) into one buffer.
pub fn encode_frame(kind: FrameKind, request_id: u64, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let header = FrameHeader::new(kind, request_id, payload.len())?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame header truncated: {0} bytes")]
    Truncated(usize),

    #[error("bad frame magic: 0x{0:04x}")]
    BadMagic(u16),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_FRAME_PAYLOAD)]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
