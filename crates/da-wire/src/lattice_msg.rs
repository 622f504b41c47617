//! # Lattice wire messages
//!
//! Carried as the payload of a `Packet` whose `kind` is `DATA`. The first
//! payload byte is a type tag, followed by a type-specific batch encoding.
//! Batching groups up to 8 logical items under one packet; which round
//! each item belongs to is not carried on the wire — it is derived from
//! the packet's `seq_id` acting as a batch index, the same scheme the
//! FIFO layer uses for application messages.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Items per outgoing packet.
pub const BATCH_MSG_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum LatticeMsgError {
    #[error("lattice payload is empty, expected at least a type tag")]
    Empty,
    #[error("unknown lattice message type tag {0}")]
    UnknownTag(u8),
    #[error("lattice payload truncated while decoding {0}")]
    Truncated(&'static str),
}

/// One proposal batched into a PROPOSAL packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalEntry {
    pub values: Vec<u32>,
    pub active_proposal_number: u32,
}

/// One accept (ACK or NACK) batched into an ACCEPT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptEntry {
    pub is_nack: bool,
    pub proposal_number: u32,
    /// Non-empty only for NACK — the accepting peer's merged `accepted` set.
    pub values: Vec<u32>,
}

/// A batched lattice-agreement message. `Decide` is declared for
/// completeness with the type-tag range the wire format reserves, but a
/// correct implementation never constructs or sends it: decisions are
/// observed locally once a proposer sees a majority of ACKs, never
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatticeMessage {
    Proposal(Vec<ProposalEntry>),
    Accept(Vec<AcceptEntry>),
    Decide,
}

const TAG_PROPOSAL: u8 = 0;
const TAG_ACCEPT: u8 = 1;
const TAG_DECIDE: u8 = 2;

impl LatticeMessage {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            LatticeMessage::Proposal(entries) => {
                buf.put_u8(TAG_PROPOSAL);
                buf.put_u32_le(entries.len() as u32);
                for entry in entries {
                    buf.put_u32_le(entry.values.len() as u32);
                    for v in &entry.values {
                        buf.put_u32_le(*v);
                    }
                    buf.put_u32_le(entry.active_proposal_number);
                }
            }
            LatticeMessage::Accept(entries) => {
                buf.put_u8(TAG_ACCEPT);
                buf.put_u32_le(entries.len() as u32);
                for entry in entries {
                    buf.put_u8(entry.is_nack as u8);
                    buf.put_u32_le(entry.proposal_number);
                    buf.put_u32_le(entry.values.len() as u32);
                    for v in &entry.values {
                        buf.put_u32_le(*v);
                    }
                }
            }
            LatticeMessage::Decide => {
                buf.put_u8(TAG_DECIDE);
            }
        }
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, LatticeMsgError> {
        if buf.is_empty() {
            return Err(LatticeMsgError::Empty);
        }
        let tag = buf.get_u8();
        match tag {
            TAG_PROPOSAL => {
                let count = need_u32(&mut buf, "proposal count")?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let n_values = need_u32(&mut buf, "proposal n_values")?;
                    let mut values = Vec::with_capacity(n_values as usize);
                    for _ in 0..n_values {
                        values.push(need_u32(&mut buf, "proposal value")?);
                    }
                    let active_proposal_number = need_u32(&mut buf, "proposal apn")?;
                    entries.push(ProposalEntry {
                        values,
                        active_proposal_number,
                    });
                }
                Ok(LatticeMessage::Proposal(entries))
            }
            TAG_ACCEPT => {
                let count = need_u32(&mut buf, "accept count")?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let is_nack = need_u8(&mut buf, "accept nack_flag")? != 0;
                    let proposal_number = need_u32(&mut buf, "accept proposal_number")?;
                    let n_values = need_u32(&mut buf, "accept n_values")?;
                    let mut values = Vec::with_capacity(n_values as usize);
                    for _ in 0..n_values {
                        values.push(need_u32(&mut buf, "accept value")?);
                    }
                    entries.push(AcceptEntry {
                        is_nack,
                        proposal_number,
                        values,
                    });
                }
                Ok(LatticeMessage::Accept(entries))
            }
            TAG_DECIDE => Ok(LatticeMessage::Decide),
            other => Err(LatticeMsgError::UnknownTag(other)),
        }
    }
}

fn need_u32(buf: &mut &[u8], what: &'static str) -> Result<u32, LatticeMsgError> {
    if buf.remaining() < 4 {
        return Err(LatticeMsgError::Truncated(what));
    }
    Ok(buf.get_u32_le())
}

fn need_u8(buf: &mut &[u8], what: &'static str) -> Result<u8, LatticeMsgError> {
    if buf.remaining() < 1 {
        return Err(LatticeMsgError::Truncated(what));
    }
    Ok(buf.get_u8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_proposal_message() {
        let msg = LatticeMessage::Proposal(vec![
            ProposalEntry {
                values: vec![1, 2],
                active_proposal_number: 1,
            },
            ProposalEntry {
                values: vec![3],
                active_proposal_number: 2,
            },
        ]);
        let encoded = msg.encode();
        let decoded = LatticeMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn round_trip_accept_message_ack_and_nack() {
        let msg = LatticeMessage::Accept(vec![
            AcceptEntry {
                is_nack: false,
                proposal_number: 1,
                values: vec![],
            },
            AcceptEntry {
                is_nack: true,
                proposal_number: 1,
                values: vec![9, 10],
            },
        ]);
        let encoded = msg.encode();
        let decoded = LatticeMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn decode_rejects_empty_payload() {
        assert!(matches!(
            LatticeMessage::decode(&[]),
            Err(LatticeMsgError::Empty)
        ));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert!(matches!(
            LatticeMessage::decode(&[0xAB]),
            Err(LatticeMsgError::UnknownTag(0xAB))
        ));
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        // Tag says Proposal, count says 1 entry, but nothing follows.
        let buf = [TAG_PROPOSAL, 1, 0, 0, 0];
        assert!(matches!(
            LatticeMessage::decode(&buf),
            Err(LatticeMsgError::Truncated(_))
        ));
    }
}
