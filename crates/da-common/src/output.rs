//! The append-only output sink shared by every layer that surfaces a line
//! to the run's output file: stubborn/perfect-link broadcasts and
//! deliveries, FIFO broadcasts/deliveries, and lattice round decisions.
//!
//! A single lock around the underlying file means a batch of related
//! lines (a FIFO delivery batch, a lattice decision) is written
//! contiguously even when multiple threads are emitting concurrently.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Lock-guarded append sink for the run's output file.
pub struct OutputWriter {
    file: Mutex<BufWriter<File>>,
}

impl OutputWriter {
    /// Truncate-and-create the output file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(OutputWriter {
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    /// `b <seq>` — a local broadcast of sequence number `seq`.
    pub fn write_broadcast(&self, seq: u32) {
        self.write_line(&format!("b {seq}"));
    }

    /// `d <origin> <seq>` — a delivery of `origin`'s message `seq`.
    pub fn write_delivery(&self, origin: u64, seq: u32) {
        self.write_line(&format!("d {origin} {seq}"));
    }

    /// Write several `d <origin> <seq>` lines under a single lock
    /// acquisition, so a batch of FIFO deliveries stays contiguous.
    pub fn write_deliveries(&self, entries: &[(u64, u32)]) {
        if entries.is_empty() {
            return;
        }
        let mut guard = self.file.lock().expect("output file mutex poisoned");
        for (origin, seq) in entries {
            if let Err(err) = writeln!(guard, "d {origin} {seq}") {
                tracing::error!(?err, "failed to write delivery line");
            }
        }
    }

    /// One decided lattice round: space-separated `u32` values.
    pub fn write_decision(&self, values: &[u32]) {
        let line = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.write_line(&line);
    }

    fn write_line(&self, line: &str) {
        let mut guard = self.file.lock().expect("output file mutex poisoned");
        if let Err(err) = writeln!(guard, "{line}") {
            tracing::error!(?err, "failed to write output line");
        }
    }

    /// Best-effort flush, called on graceful shutdown.
    pub fn flush(&self) {
        let mut guard = self.file.lock().expect("output file mutex poisoned");
        if let Err(err) = guard.flush() {
            tracing::warn!(?err, "failed to flush output file");
        }
    }
}
