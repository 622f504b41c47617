//! Per-round state for lattice agreement.

use std::collections::BTreeSet;

/// One round's local state: the value this process is trying to get
/// majority-ACKed (`proposed`), and the union of every value this process
/// has observed across any proposal for this round (`accepted`), used only
/// to answer incoming proposals with ACK or NACK.
#[derive(Debug, Default)]
pub struct RoundState {
    pub active: bool,
    pub proposed: BTreeSet<u32>,
    pub accepted: BTreeSet<u32>,
    pub active_proposal_number: u32,
    pub ack_count: usize,
    pub nack_count: usize,
}

impl RoundState {
    pub fn new() -> Self {
        RoundState::default()
    }

    /// Reset to the start of a fresh proposal attempt with `values`, the
    /// first (`apn == 1`) attempt for this round. The proposer immediately
    /// counts its own value as one ACK, mirroring the self-echo URB
    /// registers for its own broadcasts — without it a single-host or
    /// otherwise small majority could never be reached by external ACKs
    /// alone. See `DESIGN.md`. It also seeds `accepted` with its own
    /// proposed values: a proposer never receives its own PROPOSAL back
    /// through the network, so without this seed it would answer a later
    /// inbound proposal that doesn't cover its own value with an ACK
    /// instead of a NACK, letting two peers reach majorities for
    /// incomparable sets.
    pub fn start_proposal(&mut self, values: BTreeSet<u32>) {
        self.accepted.extend(values.iter().copied());
        self.proposed = values;
        self.active = true;
        self.active_proposal_number = 1;
        self.ack_count = 1;
        self.nack_count = 0;
    }

    /// Merge an incoming proposal's values into `accepted` and report
    /// whether the merge leaves `accepted` exactly equal to `t` (i.e. `t`
    /// already covered everything this process had accepted before) —
    /// true means ACK, false means NACK with the merged set.
    pub fn merge_and_should_ack(&mut self, t: &BTreeSet<u32>) -> bool {
        self.accepted.extend(t.iter().copied());
        self.accepted.len() == t.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_proposal_seeds_self_ack() {
        let mut round = RoundState::new();
        round.start_proposal(BTreeSet::from([1, 2]));
        assert!(round.active);
        assert_eq!(round.active_proposal_number, 1);
        assert_eq!(round.ack_count, 1);
        assert_eq!(round.nack_count, 0);
        assert_eq!(round.accepted, BTreeSet::from([1, 2]));
    }

    #[test]
    fn merge_acks_when_incoming_covers_prior_accepted() {
        let mut round = RoundState::new();
        assert!(round.merge_and_should_ack(&BTreeSet::from([1, 2])));
        // Accepted is now {1,2}; a proposal that is a superset of it still ACKs.
        assert!(round.merge_and_should_ack(&BTreeSet::from([1, 2, 3])));
    }

    #[test]
    fn merge_nacks_when_incoming_misses_prior_accepted() {
        let mut round = RoundState::new();
        round.accepted = BTreeSet::from([2, 3]);
        assert!(!round.merge_and_should_ack(&BTreeSet::from([1, 2])));
        assert_eq!(round.accepted, BTreeSet::from([1, 2, 3]));
    }
}
