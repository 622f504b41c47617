//! Shared types for the peer agreement stack.
//!
//! This crate contains:
//! - **Hosts** — parsing and validation of the hosts file
//! - **Config** — parsing of the per-mode run-configuration file
//! - **Error** — the typed error taxonomy shared across every layer
//! - **Logging** — `tracing` initialization shared by the CLI binary and integration tests
//! - **Output** — the lock-guarded append sink for the run's output file

pub mod config;
pub mod error;
pub mod hosts;
pub mod logging;
pub mod output;

pub use config::{FifoConfig, LatticeConfig, PlConfig, RunConfig};
pub use error::{ConfigError, DaError};
pub use hosts::{Host, HostSet};
pub use output::OutputWriter;
