//! Uniform reliable broadcast: majority-ack delivery over a perfect link.
//!
//! Echo accounting is keyed by the identity of the peer whose stubborn link
//! physically delivered a datagram, not by the packet's origin. The origin
//! is fixed at construction and carried unchanged through every relay, so
//! keying the echo set by origin would collapse it to a single contributor
//! per packet — the majority check could never fire for more than one
//! process. See `DESIGN.md` for the full writeup; [`da_link::PeerEchoFn`]
//! is the hook that makes the peer-keyed accounting possible.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use da_common::error::DaError;
use da_common::hosts::HostSet;
use da_io::{ReadinessLoop, WorkerPool};
use da_link::PerfectLink;
use da_wire::Packet;

const MONITOR_WORKERS: usize = 2;
const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Invoked once per packet that has crossed the majority-echo threshold.
pub type UrbDeliverFn = Arc<dyn Fn(Packet) + Send + Sync>;

pub struct Urb {
    self_id: u64,
    majority: usize,
    perfect: Arc<PerfectLink>,
    pending: Vec<Mutex<HashMap<u32, Packet>>>,
    ack_from: Mutex<HashMap<u32, HashSet<u64>>>,
    delivered: Vec<Mutex<HashSet<u32>>>,
    monitor_pool: WorkerPool,
    stop: Arc<AtomicBool>,
}

impl Urb {
    /// Build a URB instance over a fresh perfect link for `self_id`, and
    /// start its two monitor workers. `on_deliver` is called at most once
    /// per `(origin_pid, seq_id)`, after uniform delivery, in no particular
    /// cross-sender order — the FIFO layer above imposes per-sender order.
    pub fn new(
        self_id: u64,
        hosts: &HostSet,
        readiness: &ReadinessLoop,
        write_pool: Arc<WorkerPool>,
        on_deliver: UrbDeliverFn,
    ) -> Result<Arc<Self>, DaError> {
        if hosts.get(self_id).is_none() {
            return Err(DaError::resource_acquisition("own host id not present in host set"));
        }

        let majority = hosts.majority();
        let shard_count = hosts.len().max(1);
        let pending = (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect();
        let delivered: Vec<_> = (0..shard_count).map(|_| Mutex::new(HashSet::new())).collect();
        let stop = Arc::new(AtomicBool::new(false));

        let urb = Arc::new_cyclic(|weak: &std::sync::Weak<Urb>| {
            let weak_for_deliver = weak.clone();
            let weak_for_echo = weak.clone();

            // `self_id` was just confirmed present in `hosts`, the only
            // failure mode `PerfectLink::new_with_echo_hook` has, so this
            // construction cannot fail.
            let perfect = PerfectLink::new_with_echo_hook(
                self_id,
                hosts,
                readiness,
                write_pool,
                Arc::new(move |pkt: Packet| {
                    if let Some(urb) = weak_for_deliver.upgrade() {
                        urb.on_first_network_delivery(pkt);
                    }
                }),
                Some(Arc::new(move |peer_id: u64, pkt: Packet| {
                    if let Some(urb) = weak_for_echo.upgrade() {
                        urb.register_echo(peer_id, pkt.key().1);
                    }
                })),
            )
            .expect("self host id already validated present");

            Urb {
                self_id,
                majority,
                perfect,
                pending,
                ack_from: Mutex::new(HashMap::new()),
                delivered,
                monitor_pool: WorkerPool::new("urb-monitor", MONITOR_WORKERS),
                stop: stop.clone(),
            }
        });

        urb.spawn_monitors(on_deliver);
        Ok(urb)
    }

    pub fn self_id(&self) -> u64 {
        self.self_id
    }

    /// `urb_broadcast`: mark each packet pending under its own origin shard,
    /// register this process's own echo, and fan it out over the perfect
    /// link to every peer.
    pub fn broadcast(&self, packets: Vec<Packet>) {
        for pkt in packets {
            let (origin, seq) = pkt.key();
            self.insert_pending(origin, seq, pkt.clone());
            self.register_echo(self.self_id, seq);
            self.perfect.send_all(pkt);
        }
    }

    /// First time this process has heard of `pkt` from anywhere (gated by
    /// the perfect link's own at-most-once dedup). Insert into `pending`
    /// and relay: re-broadcasting is what spreads a message to peers the
    /// original sender never reached, achieving uniform delivery even if
    /// the sender crashes partway through.
    fn on_first_network_delivery(&self, pkt: Packet) {
        let (origin, seq) = pkt.key();
        self.insert_pending(origin, seq, pkt.clone());
        self.register_echo(self.self_id, seq);
        self.perfect.send_all(pkt);
    }

    fn insert_pending(&self, origin: u64, seq: u32, pkt: Packet) {
        let shard = self.shard_for(origin);
        let mut guard = self.pending[shard].lock().expect("urb pending shard poisoned");
        guard.entry(seq).or_insert(pkt);
    }

    fn register_echo(&self, peer_id: u64, seq: u32) {
        let mut guard = self.ack_from.lock().expect("urb ack_from mutex poisoned");
        guard.entry(seq).or_default().insert(peer_id);
    }

    fn shard_for(&self, origin_pid: u64) -> usize {
        ((origin_pid.saturating_sub(1)) as usize) % self.pending.len().max(1)
    }

    fn spawn_monitors(self: &Arc<Self>, on_deliver: UrbDeliverFn) {
        for worker_index in 0..MONITOR_WORKERS {
            let urb = self.clone();
            let on_deliver = on_deliver.clone();
            let stop = self.stop.clone();
            let _ = self.monitor_pool.enqueue(Box::new(move || {
                while !stop.load(Ordering::Acquire) {
                    let progressed = urb.monitor_pass(worker_index, &on_deliver);
                    if !progressed {
                        std::thread::sleep(MONITOR_POLL_INTERVAL);
                    }
                }
            }));
        }
    }

    /// One scan of every pending shard assigned to `worker_index` (shards
    /// are partitioned `shard_index mod MONITOR_WORKERS`). Returns whether
    /// any packet crossed the majority threshold on this pass.
    fn monitor_pass(&self, worker_index: usize, on_deliver: &UrbDeliverFn) -> bool {
        let mut progressed = false;
        for shard in (worker_index..self.pending.len()).step_by(MONITOR_WORKERS) {
            let candidates: Vec<Packet> = {
                let pending_guard = self.pending[shard].lock().expect("urb pending shard poisoned");
                let delivered_guard = self.delivered[shard].lock().expect("urb delivered shard poisoned");
                pending_guard
                    .values()
                    .filter(|pkt| !delivered_guard.contains(&pkt.key().1))
                    .cloned()
                    .collect()
            };
            if candidates.is_empty() {
                continue;
            }
            let ack_from = self.ack_from.lock().expect("urb ack_from mutex poisoned");
            for pkt in candidates {
                let seq = pkt.key().1;
                let echoes = ack_from.get(&seq).map(HashSet::len).unwrap_or(0);
                if echoes >= self.majority {
                    let first = {
                        let mut delivered_guard =
                            self.delivered[shard].lock().expect("urb delivered shard poisoned");
                        delivered_guard.insert(seq)
                    };
                    if first {
                        on_deliver(pkt);
                        progressed = true;
                    }
                }
            }
        }
        progressed
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.perfect.stop();
    }
}
