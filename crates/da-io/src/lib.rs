//! # da-io
//!
//! The shared I/O substrate every layer above it depends on:
//!
//! - [`worker_pool`] — fixed-size FIFO task queue with N long-lived worker threads
//! - [`readiness`] — multi-worker, edge-triggered, one-shot readiness loop
//! - [`udp`] — non-blocking connected UDP endpoint construction

pub mod readiness;
pub mod udp;
pub mod worker_pool;

pub use readiness::{ReadinessLoop, Token};
pub use udp::bind_connected_udp;
pub use worker_pool::WorkerPool;
