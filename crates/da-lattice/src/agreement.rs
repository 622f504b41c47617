//! Lattice agreement engine: one [`RoundState`] per proposal slot, driven
//! by PROPOSAL/ACCEPT messages carried as `LatticeMessage` payloads over a
//! plain perfect link.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use da_common::error::DaError;
use da_common::hosts::HostSet;
use da_common::OutputWriter;
use da_io::{ReadinessLoop, WorkerPool};
use da_link::PerfectLink;
use da_wire::{AcceptEntry, LatticeMessage, Packet, ProposalEntry, BATCH_MSG_SIZE};

use crate::round::RoundState;

pub struct LatticeAgreement {
    self_id: u64,
    majority: usize,
    perfect: Arc<PerfectLink>,
    rounds: Vec<Mutex<RoundState>>,
    decisions: Mutex<HashMap<u32, Vec<u32>>>,
    next_round_to_output: Mutex<u32>,
    output: Arc<OutputWriter>,
}

impl LatticeAgreement {
    /// `round_count` is the number of proposal slots this run will decide —
    /// `p` from the lattice run-configuration file.
    pub fn new(
        self_id: u64,
        hosts: &HostSet,
        readiness: &ReadinessLoop,
        write_pool: Arc<WorkerPool>,
        round_count: usize,
        output: Arc<OutputWriter>,
    ) -> Result<Arc<Self>, DaError> {
        if hosts.get(self_id).is_none() {
            return Err(DaError::resource_acquisition("own host id not present in host set"));
        }

        let majority = hosts.majority();
        let rounds = (0..round_count).map(|_| Mutex::new(RoundState::new())).collect();

        let lattice = Arc::new_cyclic(|weak: &Weak<LatticeAgreement>| {
            let weak_for_deliver = weak.clone();
            // Self-host presence was just validated, the only failure mode
            // `PerfectLink::new` has, so this construction cannot fail.
            let perfect = PerfectLink::new(
                self_id,
                hosts,
                readiness,
                write_pool,
                Arc::new(move |pkt: Packet| {
                    if let Some(lattice) = weak_for_deliver.upgrade() {
                        lattice.on_datagram_delivered(pkt);
                    }
                }),
            )
            .expect("self host id already validated present");

            LatticeAgreement {
                self_id,
                majority,
                perfect,
                rounds,
                decisions: Mutex::new(HashMap::new()),
                next_round_to_output: Mutex::new(0),
                output,
            }
        });

        Ok(lattice)
    }

    pub fn self_id(&self) -> u64 {
        self.self_id
    }

    /// Propose one value set for a single round.
    pub fn propose(&self, round: u32, values: Vec<u32>) {
        self.propose_many(vec![(round, values)]);
    }

    /// Propose value sets for several rounds at once, batching up to
    /// [`BATCH_MSG_SIZE`] PROPOSAL entries per outgoing packet. Rounds need
    /// not be contiguous; batching only groups adjacent entries in the
    /// slice passed in, identifying each outgoing packet's batch by the
    /// first round index it carries.
    pub fn propose_many(&self, proposals: Vec<(u32, Vec<u32>)>) {
        for (round, values) in &proposals {
            let mut state = self.rounds[*round as usize].lock().expect("round mutex poisoned");
            state.start_proposal(values.iter().copied().collect());
        }

        for chunk in proposals.chunks(BATCH_MSG_SIZE) {
            let base_round = chunk[0].0;
            let entries = chunk
                .iter()
                .map(|(_, values)| ProposalEntry {
                    values: values.clone(),
                    active_proposal_number: 1,
                })
                .collect();
            self.send_proposal_packet(base_round, entries);
        }

        for (round, _) in &proposals {
            self.check_termination(*round as usize);
        }
    }

    fn on_datagram_delivered(&self, pkt: Packet) {
        let from = pkt.origin_pid;
        let base_round = pkt.seq_id;
        let message = match LatticeMessage::decode(&pkt.payload) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(?err, from, "dropping malformed lattice payload");
                return;
            }
        };

        match message {
            LatticeMessage::Proposal(entries) => {
                for (i, entry) in entries.into_iter().enumerate() {
                    self.on_proposal(base_round + i as u32, from, entry);
                }
            }
            LatticeMessage::Accept(entries) => {
                for (i, entry) in entries.into_iter().enumerate() {
                    self.on_accept(base_round + i as u32, entry);
                }
            }
            LatticeMessage::Decide => {
                tracing::warn!(from, "received a Decide message; no correct peer ever sends one");
            }
        }
    }

    fn on_proposal(&self, round: u32, from: u64, entry: ProposalEntry) {
        if round as usize >= self.rounds.len() {
            tracing::warn!(round, from, "proposal for an out-of-range round");
            return;
        }
        let t: BTreeSet<u32> = entry.values.iter().copied().collect();
        let (is_ack, merged) = {
            let mut state = self.rounds[round as usize].lock().expect("round mutex poisoned");
            let is_ack = state.merge_and_should_ack(&t);
            (is_ack, state.accepted.iter().copied().collect::<Vec<u32>>())
        };

        let accept = AcceptEntry {
            is_nack: !is_ack,
            proposal_number: entry.active_proposal_number,
            values: if is_ack { Vec::new() } else { merged },
        };
        self.send_accept_packet(round, from, accept);
    }

    fn on_accept(&self, round: u32, entry: AcceptEntry) {
        if round as usize >= self.rounds.len() {
            tracing::warn!(round, "accept for an out-of-range round");
            return;
        }
        {
            let mut state = self.rounds[round as usize].lock().expect("round mutex poisoned");
            if !state.active || entry.proposal_number != state.active_proposal_number {
                return;
            }
            if entry.is_nack {
                state.proposed.extend(entry.values.iter().copied());
                state.nack_count += 1;
            } else {
                state.ack_count += 1;
            }
        }
        self.check_termination(round as usize);
    }

    /// Shared by `propose_many` (covers the degenerate single-host/majority
    /// case where the self-ack alone already meets the threshold) and
    /// `on_accept`.
    fn check_termination(&self, round_idx: usize) {
        enum Outcome {
            Decide(Vec<u32>),
            Retry(u32, Vec<u32>),
        }

        let outcome = {
            let mut state = self.rounds[round_idx].lock().expect("round mutex poisoned");
            if !state.active {
                return;
            }
            if state.ack_count >= self.majority {
                state.active = false;
                Some(Outcome::Decide(state.proposed.iter().copied().collect()))
            } else if state.nack_count > 0 && state.ack_count + state.nack_count >= self.majority {
                state.active_proposal_number += 1;
                state.ack_count = 1;
                state.nack_count = 0;
                state.accepted.extend(state.proposed.iter().copied());
                Some(Outcome::Retry(
                    state.active_proposal_number,
                    state.proposed.iter().copied().collect(),
                ))
            } else {
                None
            }
        };

        match outcome {
            Some(Outcome::Decide(values)) => self.record_decision(round_idx as u32, values),
            Some(Outcome::Retry(apn, values)) => {
                let entries = vec![ProposalEntry {
                    values,
                    active_proposal_number: apn,
                }];
                self.send_proposal_packet(round_idx as u32, entries);
            }
            None => {}
        }
    }

    fn record_decision(&self, round: u32, values: Vec<u32>) {
        let mut decisions = self.decisions.lock().expect("decisions mutex poisoned");
        decisions.insert(round, values);
        let mut cursor = self.next_round_to_output.lock().expect("output cursor mutex poisoned");
        while let Some(values) = decisions.remove(&cursor) {
            self.output.write_decision(&values);
            *cursor += 1;
        }
    }

    fn send_proposal_packet(&self, base_round: u32, entries: Vec<ProposalEntry>) {
        let msg = LatticeMessage::Proposal(entries);
        let pkt = Packet::new_data_with_seq(self.self_id, base_round, msg.encode());
        self.perfect.send_all(pkt);
    }

    fn send_accept_packet(&self, round: u32, to_peer: u64, entry: AcceptEntry) {
        let msg = LatticeMessage::Accept(vec![entry]);
        let pkt = Packet::new_data_with_seq(self.self_id, round, msg.encode());
        if let Err(err) = self.perfect.send(to_peer, pkt) {
            tracing::warn!(peer = to_peer, round, ?err, "failed to send lattice accept");
        }
    }

    pub fn stop(&self) {
        self.perfect.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn free_port() -> u16 {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    }

    #[test]
    fn single_host_decides_from_self_ack_alone() {
        da_wire::packet::reset_global_seq_id_for_test();
        let hosts: HostSet = format!("1 127.0.0.1 {}\n", free_port()).parse().unwrap();
        let readiness = Arc::new(ReadinessLoop::new().unwrap());
        let write_pool = Arc::new(WorkerPool::new("test-lattice-write", 1));
        let output_path = {
            let mut p = std::env::temp_dir();
            p.push(format!("da-lattice-test-single-{}", std::process::id()));
            p
        };
        let output = Arc::new(OutputWriter::create(&output_path).unwrap());

        let lattice = LatticeAgreement::new(1, &hosts, &readiness, write_pool, 1, output).unwrap();
        lattice.propose(0, vec![1, 2]);

        let decisions = lattice.decisions.lock().unwrap();
        assert_eq!(decisions.get(&0), Some(&vec![1, 2]));
        drop(decisions);
        lattice.stop();
        let _ = std::fs::remove_file(&output_path);
    }

    #[test]
    fn on_proposal_acks_when_no_prior_accepted_state() {
        da_wire::packet::reset_global_seq_id_for_test();
        let hosts: HostSet = format!(
            "1 127.0.0.1 {}\n2 127.0.0.1 {}\n",
            free_port(),
            free_port()
        )
        .parse()
        .unwrap();
        let readiness = Arc::new(ReadinessLoop::new().unwrap());
        let write_pool = Arc::new(WorkerPool::new("test-lattice-proposal", 1));
        let output_path = {
            let mut p = std::env::temp_dir();
            p.push(format!("da-lattice-test-proposal-{}", std::process::id()));
            p
        };
        let output = Arc::new(OutputWriter::create(&output_path).unwrap());
        let lattice = LatticeAgreement::new(1, &hosts, &readiness, write_pool, 1, output).unwrap();

        let loop_for_worker = readiness.clone();
        let worker = thread::spawn(move || loop_for_worker.run());

        lattice.on_proposal(
            0,
            2,
            ProposalEntry {
                values: vec![5, 6],
                active_proposal_number: 1,
            },
        );
        let state = lattice.rounds[0].lock().unwrap();
        assert_eq!(state.accepted, BTreeSet::from([5, 6]));
        drop(state);

        lattice.stop();
        readiness.stop(1);
        worker.join().unwrap();
        let _ = std::fs::remove_file(&output_path);
    }
}
