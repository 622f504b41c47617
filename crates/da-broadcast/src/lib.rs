//! Uniform reliable broadcast, and the per-sender FIFO layer above it.
//!
//! Both are built on a single shared [`da_link::PerfectLink`]: URB consumes
//! its deduplicated upward delivery and its raw per-peer echo hook, FIFO
//! consumes URB's upward delivery in turn.

pub mod fifo;
pub mod urb;

pub use fifo::Fifo;
pub use urb::Urb;
