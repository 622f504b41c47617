//! # da-link
//!
//! The reliability stack above raw datagrams:
//!
//! - [`token_bucket`] — the per-link send budget backing stubborn-link retransmission
//! - [`stubborn`] — per-peer retransmitting link, fair-loss resilient
//! - [`perfect`] — dedup and fan-out across per-peer stubborn links

pub mod perfect;
pub mod stubborn;
pub mod token_bucket;

pub use perfect::{PeerEchoFn, PerfectLink, UpwardDeliverFn};
pub use stubborn::StubbornLink;
pub use token_bucket::{TokenBucket, TokenBucketConfig};
