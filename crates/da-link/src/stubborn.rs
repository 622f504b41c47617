//! Stubborn link: "if the receiver is up and the network eventually
//! delivers, every packet handed to us is eventually delivered to it."
//!
//! One instance per ordered peer pair, layered on a single non-blocking
//! connected UDP socket. Send is pure buffering — no I/O on the caller's
//! thread. A retransmit task, drawn from the shared write worker pool
//! only while there is work to drain, repeatedly snapshots the unacked
//! set under the token-bucket budget and resends.

use std::collections::HashSet;
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use da_common::error::DaError;
use da_io::WorkerPool;
use da_wire::Packet;
use rand::Rng;

use crate::token_bucket::{TokenBucket, TokenBucketConfig};

const MIN_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(1000);

/// Invoked with each DATA packet handed up from the peer. Must not block.
pub type DeliverFn = Arc<dyn Fn(Packet) + Send + Sync>;

pub struct StubbornLink {
    self_id: u64,
    peer_id: u64,
    socket: UdpSocket,
    unacked: Mutex<HashSet<Packet>>,
    budget: TokenBucket,
    stop: AtomicBool,
    write_pool: Arc<WorkerPool>,
    on_deliver: DeliverFn,
}

impl StubbornLink {
    pub fn new(
        self_id: u64,
        peer_id: u64,
        socket: UdpSocket,
        write_pool: Arc<WorkerPool>,
        on_deliver: DeliverFn,
    ) -> Arc<Self> {
        Arc::new(StubbornLink {
            self_id,
            peer_id,
            socket,
            unacked: Mutex::new(HashSet::new()),
            budget: TokenBucket::new(TokenBucketConfig::default()),
            stop: AtomicBool::new(false),
            write_pool,
            on_deliver,
        })
    }

    pub fn peer_id(&self) -> u64 {
        self.peer_id
    }

    /// Raw file descriptor access for readiness-loop registration lives in
    /// the caller (`PerfectLink`), which owns the mio-wrapped clone of this
    /// socket used for read dispatch.
    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    /// Buffer `packets` for retransmission. Pure insert; no I/O here. If
    /// the unacked set was empty (the `idle` state), this transitions the
    /// link to `draining` and kicks off the retransmit task.
    pub fn send(self: &Arc<Self>, packets: impl IntoIterator<Item = Packet>) -> Result<(), DaError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(DaError::stopped("stubborn link"));
        }
        let was_empty = {
            let mut unacked = self.unacked.lock().expect("unacked mutex poisoned");
            let was_empty = unacked.is_empty();
            for pkt in packets {
                unacked.insert(pkt);
            }
            was_empty
        };
        if was_empty {
            self.spawn_drain_loop();
        }
        Ok(())
    }

    pub fn unacked_len(&self) -> usize {
        self.unacked.lock().expect("unacked mutex poisoned").len()
    }

    /// Decode and process one inbound datagram. Malformed payloads are
    /// logged and dropped, never propagated.
    pub fn on_datagram(&self, raw: &[u8]) {
        match Packet::decode(raw) {
            Ok(pkt) => self.process(pkt),
            Err(err) => {
                tracing::warn!(peer = self.peer_id, ?err, "dropping malformed datagram");
            }
        }
    }

    fn process(&self, pkt: Packet) {
        if pkt.is_ack() {
            let removed = {
                let mut unacked = self.unacked.lock().expect("unacked mutex poisoned");
                unacked.remove(&pkt)
            };
            if removed {
                self.budget.credit(1);
            }
            return;
        }

        (self.on_deliver)(pkt.clone());

        let ack = Packet::new_ack(pkt.origin_pid, pkt.seq_id);
        if let Err(err) = self.socket.send(&ack.encode()) {
            if !is_transient(&err) {
                tracing::warn!(peer = self.peer_id, ?err, "failed to send ack");
            }
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn spawn_drain_loop(self: &Arc<Self>) {
        let this = self.clone();
        // A failed enqueue only happens once the write pool itself is
        // stopping, which implies the whole process is shutting down.
        let _ = self.write_pool.enqueue(move || this.drain_loop());
    }

    fn drain_loop(&self) {
        let mut backoff = MIN_BACKOFF;
        loop {
            if self.stop.load(Ordering::Acquire) {
                return;
            }

            let available = self.budget.available();
            let snapshot: Vec<Packet> = {
                let unacked = self.unacked.lock().expect("unacked mutex poisoned");
                if unacked.is_empty() {
                    return;
                }
                unacked.iter().take(available as usize).cloned().collect()
            };

            if snapshot.is_empty() {
                thread::sleep(self.budget.replenish_interval());
                self.budget.replenish_if_due();
                continue;
            }

            let mut attempted = 0u32;
            let mut transient_hit = false;
            for pkt in &snapshot {
                attempted += 1;
                match self.socket.send(&pkt.encode()) {
                    Ok(_) => {}
                    Err(err) if is_transient(&err) => {
                        transient_hit = true;
                        break;
                    }
                    Err(err) => {
                        tracing::error!(
                            self_id = self.self_id,
                            peer = self.peer_id,
                            ?err,
                            "fatal error sending on stubborn link"
                        );
                        return;
                    }
                }
            }
            self.budget.take(attempted);
            self.budget.replenish_if_due();

            if transient_hit {
                backoff = jittered_backoff(backoff);
                thread::sleep(backoff);
            } else {
                backoff = MIN_BACKOFF;
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::ConnectionRefused
    )
}

fn jittered_backoff(previous: Duration) -> Duration {
    let doubled = (previous * 2).min(MAX_BACKOFF);
    let jitter_ms = rand::rng().random_range(0..=(doubled.as_millis() as u64 / 2).max(1));
    (doubled + Duration::from_millis(jitter_ms)).min(MAX_BACKOFF)
}
