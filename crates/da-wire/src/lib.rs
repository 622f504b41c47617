//! # da-wire
//!
//! Wire format for the peer agreement stack: the 20-byte packet header
//! used by every layer, and the lattice agreement's PROPOSAL/ACCEPT
//! message encodings carried in a packet's payload.
//!
//! ## Crate structure
//!
//! - [`packet`] — `Packet` header codec, global sequence counter
//! - [`lattice_msg`] — `LatticeMessage` (Proposal / Accept) codec

pub mod lattice_msg;
pub mod packet;

pub use lattice_msg::{AcceptEntry, LatticeMessage, ProposalEntry, BATCH_MSG_SIZE};
pub use packet::{Packet, PacketType, WireError, HEADER_LEN};
