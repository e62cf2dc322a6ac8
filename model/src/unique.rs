// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The per-worker unique storage: one intern table per state-component
//! type. Interning every component keeps the state vector pointer-sized and
//! makes duplicate detection a pointer hash.

use crate::candidates::Candidates;
use crate::choices::Choices;
use crate::fib::Fib;
use crate::openflow::OpenflowUpdateState;
use crate::reachcounts::ReachCounts;
use crate::visited::VisitedHops;
use emulation::result::{InjectionResult, InjectionResults};
use net::hist::{NodePacketHistory, PacketHistory};
use net::packet::Packet;
use net::payload::Payload;
use storage::Interner;

pub struct UniqueStorage {
    pub packets: Interner<Packet>,
    pub payloads: Interner<Payload>,
    pub node_pkt_hists: Interner<NodePacketHistory>,
    pub pkt_hists: Interner<PacketHistory>,
    pub fibs: Interner<Fib>,
    pub choices: Interner<Choices>,
    pub candidates: Interner<Candidates>,
    pub reach_counts: Interner<ReachCounts>,
    pub visited_hops: Interner<VisitedHops>,
    pub of_update_states: Interner<OpenflowUpdateState>,
    pub injection_results: Interner<InjectionResult>,
    pub injection_result_sets: Interner<InjectionResults>,
}

impl UniqueStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            packets: Interner::new(),
            payloads: Interner::new(),
            node_pkt_hists: Interner::new(),
            pkt_hists: Interner::new(),
            fibs: Interner::new(),
            choices: Interner::new(),
            candidates: Interner::new(),
            reach_counts: Interner::new(),
            visited_hops: Interner::new(),
            of_update_states: Interner::new(),
            injection_results: Interner::new(),
            injection_result_sets: Interner::new(),
        }
    }

    pub fn reset(&mut self) {
        self.packets.reset();
        self.payloads.reset();
        self.node_pkt_hists.reset();
        self.pkt_hists.reset();
        self.fibs.reset();
        self.choices.reset();
        self.candidates.reset();
        self.reach_counts.reset();
        self.visited_hops.reset();
        self.of_update_states.reset();
        self.injection_results.reset();
        self.injection_result_sets.reset();
    }
}

impl Default for UniqueStorage {
    fn default() -> Self {
        Self::new()
    }
}
