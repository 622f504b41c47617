//! Multi-shot, set-valued lattice agreement: one independent round per
//! proposal slot, decided by majority ACK over best-effort broadcast.
//!
//! Unlike URB, lattice messages are never relayed — a PROPOSAL or ACCEPT
//! packet's `origin_pid` is always the process that actually sent it, so
//! the plain (non-echo) [`da_link::PerfectLink`] delivery hook is enough to
//! know who to reply to.

pub mod agreement;
pub mod round;

pub use agreement::LatticeAgreement;
pub use round::RoundState;
