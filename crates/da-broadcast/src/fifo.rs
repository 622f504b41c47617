//! FIFO broadcast: per-sender in-order delivery on top of URB.
//!
//! `pending[p]` holds URB-delivered packets from `p` that have not yet been
//! handed upward because a gap before them remains. Entries are erased as
//! soon as they are delivered rather than retained for the life of the
//! process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use da_common::hosts::HostSet;
use da_common::OutputWriter;
use da_wire::Packet;

struct SenderState {
    next: u32,
    pending: HashMap<u32, Packet>,
}

pub struct Fifo {
    output: Arc<OutputWriter>,
    senders: Vec<Mutex<SenderState>>,
}

impl Fifo {
    /// One slot per host, indexed by [`HostSet::shard_index`], each
    /// expecting its first delivery at `seq_id == 1`.
    pub fn new(hosts: &HostSet, output: Arc<OutputWriter>) -> Self {
        let senders = (0..hosts.len().max(1))
            .map(|_| {
                Mutex::new(SenderState {
                    next: 1,
                    pending: HashMap::new(),
                })
            })
            .collect();
        Fifo { output, senders }
    }

    /// `urb_deliver` handler: buffer `pkt` under its origin, then drain as
    /// many contiguous entries as are now available, emitting them as a
    /// single batch of `d <origin> <seq>` lines.
    pub fn on_urb_deliver(&self, hosts: &HostSet, pkt: Packet) {
        let (origin, seq) = pkt.key();
        let shard = hosts.shard_index(origin);
        if shard >= self.senders.len() {
            tracing::warn!(origin, "fifo delivery from an origin outside the host set");
            return;
        }

        let mut to_deliver = Vec::new();
        {
            let mut state = self.senders[shard].lock().expect("fifo sender state poisoned");
            state.pending.insert(seq, pkt);
            while let Some(_next_pkt) = state.pending.get(&state.next) {
                to_deliver.push((origin, state.next));
                state.pending.remove(&state.next);
                state.next += 1;
            }
        }

        self.output.write_deliveries(&to_deliver);
    }
}
