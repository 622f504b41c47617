//! # Packet header
//!
//! Fixed 20-byte header, little-endian, followed by the payload.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      origin_pid (64, LE)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          type (32, LE)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        seq_id (32, LE)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     payload_len (32, LE)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           payload ...                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// `origin_pid(8) + type(4) + seq_id(4) + payload_len(4)`.
pub const HEADER_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("datagram too short to contain a packet header: {len} < {HEADER_LEN}")]
    TooShort { len: usize },

    #[error("declared payload_len {declared} does not match remaining buffer length {actual}")]
    PayloadLengthMismatch { declared: u32, actual: usize },

    #[error("unknown packet type tag {0}")]
    UnknownType(u32),
}

/// Packet type tag. Encoded as a 4-byte field per the wire layout above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    Data = 0,
    Ack = 1,
}

impl PacketType {
    fn from_tag(tag: u32) -> Result<Self, WireError> {
        match tag {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Ack),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// The wire unit flowing through every layer.
///
/// Equality and hashing are keyed by `(origin_pid, seq_id)` only, matching
/// the in-flight tracking semantics used by unacked/pending/delivered sets
/// — two packets with the same origin and sequence number are the same
/// logical packet even if their payload bytes were reconstructed separately
/// (e.g. an ACK built locally vs. one round-tripped through the wire).
#[derive(Debug, Clone)]
pub struct Packet {
    pub origin_pid: u64,
    pub kind: PacketType,
    pub seq_id: u32,
    pub payload: Bytes,
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.origin_pid == other.origin_pid && self.seq_id == other.seq_id
    }
}
impl Eq for Packet {}

impl std::hash::Hash for Packet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.origin_pid.hash(state);
        self.seq_id.hash(state);
    }
}

/// Process-global monotonic counter. DATA packets draw their `seq_id`
/// from here at construction; ACKs copy the `seq_id` of the DATA they
/// acknowledge instead of drawing a fresh one.
static GLOBAL_SEQ_ID: AtomicU32 = AtomicU32::new(1);

/// Reset the global counter. Test-only: production code never needs to
/// rewind the sequence space.
#[cfg(any(test, feature = "test-util"))]
pub fn reset_global_seq_id_for_test() {
    GLOBAL_SEQ_ID.store(1, Ordering::SeqCst);
}

impl Packet {
    /// Build a DATA packet, drawing the next process-global sequence id.
    pub fn new_data(origin_pid: u64, payload: Bytes) -> Self {
        let seq_id = GLOBAL_SEQ_ID.fetch_add(1, Ordering::SeqCst);
        Packet {
            origin_pid,
            kind: PacketType::Data,
            seq_id,
            payload,
        }
    }

    /// Build a DATA packet with an explicit sequence id. Used when a
    /// relaying layer (URB) needs to re-broadcast a packet it already
    /// assigned a seq_id to, or in tests.
    pub fn new_data_with_seq(origin_pid: u64, seq_id: u32, payload: Bytes) -> Self {
        Packet {
            origin_pid,
            kind: PacketType::Data,
            seq_id,
            payload,
        }
    }

    /// Build an ACK for the given `(origin_pid, seq_id)`. ACKs carry no
    /// payload.
    pub fn new_ack(origin_pid: u64, seq_id: u32) -> Self {
        Packet {
            origin_pid,
            kind: PacketType::Ack,
            seq_id,
            payload: Bytes::new(),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, PacketType::Data)
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind, PacketType::Ack)
    }

    /// Key used by every sharded/hashed in-flight set: `(origin_pid, seq_id)`.
    pub fn key(&self) -> (u64, u32) {
        (self.origin_pid, self.seq_id)
    }

    /// Serialize into a freshly allocated buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u64_le(self.origin_pid);
        buf.put_u32_le(self.kind as u32);
        buf.put_u32_le(self.seq_id);
        buf.put_u32_le(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a packet from a received datagram. `buf` must contain
    /// exactly one packet (datagrams are message-oriented, so there is
    /// never trailing data from a different packet).
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::TooShort { len: buf.len() });
        }
        let origin_pid = buf.get_u64_le();
        let type_tag = buf.get_u32_le();
        let seq_id = buf.get_u32_le();
        let payload_len = buf.get_u32_le();

        if buf.remaining() != payload_len as usize {
            return Err(WireError::PayloadLengthMismatch {
                declared: payload_len,
                actual: buf.remaining(),
            });
        }

        let kind = PacketType::from_tag(type_tag)?;
        let payload = Bytes::copy_from_slice(buf.chunk());

        Ok(Packet {
            origin_pid,
            kind,
            seq_id,
            payload,
        })
    }
}
