//! Error taxonomy shared across every layer of the stack.
//!
//! Transient I/O conditions (would-block, connection-refused) are never
//! represented here — they are handled locally at the point of occurrence
//! and never propagate. Everything in [`DaError`] is either fatal at
//! startup or a typed failure returned from an offending call.

use thiserror::Error;

/// Configuration and hosts-file parsing failures. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Malformed {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("host ids must be 1-based, dense and ascending; found {found} after {expected_prev}")]
    NonDenseHostIds { expected_prev: u64, found: u64 },

    #[error("lattice proposal on line {line} has {count} values, exceeding max_values_per_proposal={max}")]
    ProposalTooWide { line: usize, count: usize, max: u32 },
}

/// Top-level error type a layer returns to its caller. Crate-specific
/// error enums (wire codec, link, worker pool) convert into this via
/// `#[from]` where the CLI binary needs a single error chain to print.
#[derive(Debug, Error)]
pub enum DaError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A subsystem (stubborn link, worker pool, readiness loop) was asked
    /// to do work after it had already been stopped.
    #[error("{subsystem} is stopped")]
    Stopped { subsystem: &'static str },

    /// A resource could not be acquired at startup (bind, socket, event
    /// registration). Always fatal.
    #[error("failed to acquire {resource}: {source}")]
    ResourceAcquisition {
        resource: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DaError {
    pub fn stopped(subsystem: &'static str) -> Self {
        DaError::Stopped { subsystem }
    }

    /// Convenience constructor for resource-acquisition failures that
    /// don't originate from a specific `io::Error` (e.g. a missing
    /// configuration entry discovered at startup).
    pub fn resource_acquisition(resource: impl Into<String>) -> Self {
        DaError::ResourceAcquisition {
            resource: resource.into(),
            source: std::io::Error::other("unavailable"),
        }
    }
}

/// A short human label for the kind of error, used only for logging.
pub fn error_kind(err: &DaError) -> &'static str {
    match err {
        DaError::Config(_) => "config",
        DaError::Stopped { .. } => "stopped",
        DaError::ResourceAcquisition { .. } => "resource",
        DaError::Other(_) => "other",
    }
}
