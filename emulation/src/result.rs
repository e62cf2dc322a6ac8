// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Interned injection outcomes.

use net::packet::Packet;
use std::fmt::{self, Display};
use storage::Interned;

/// One observed outcome of injecting a packet: the packets that emerged
/// (sorted, deduplicated) and whether the drop monitor confirmed an explicit
/// drop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectionResult {
    recv_pkts: Vec<Interned<Packet>>,
    explicit_drop: bool,
}

impl InjectionResult {
    #[must_use]
    pub fn new(mut recv_pkts: Vec<Interned<Packet>>, explicit_drop: bool) -> Self {
        recv_pkts.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        recv_pkts.dedup();
        Self {
            recv_pkts,
            explicit_drop,
        }
    }

    #[must_use]
    pub fn recv_pkts(&self) -> &[Interned<Packet>] {
        &self.recv_pkts
    }

    #[must_use]
    pub fn explicit_drop(&self) -> bool {
        self.explicit_drop
    }
}

impl Display for InjectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pkt in &self.recv_pkts {
            writeln!(f, " - received: {}", pkt.as_ref())?;
        }
        write!(f, " - explicitly dropped: {}", self.explicit_drop)
    }
}

/// The set of distinct outcomes observed for one `(middlebox, history)` key.
/// Kept as a sorted unique vector; duplicates are rare so a vector beats a
/// set here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InjectionResults {
    results: Vec<Interned<InjectionResult>>,
}

impl InjectionResults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: Interned<InjectionResult>) {
        let pos = self.results.partition_point(|r| *r < result);
        if self.results.get(pos) != Some(&result) {
            self.results.insert(pos, result);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn at(&self, i: usize) -> &Interned<InjectionResult> {
        &self.results[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interned<InjectionResult>> {
        self.results.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::proto::ProtoState;
    use storage::Interner;

    fn pkt(seq: u32) -> Packet {
        Packet {
            ingress_intf: None,
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            src_port: 1,
            dst_port: 2,
            seq,
            ack: 0,
            proto_state: ProtoState::TcpInit1,
            payload: None,
        }
    }

    #[test]
    fn recv_pkts_are_sorted_and_unique() {
        let mut pkts: Interner<Packet> = Interner::new();
        let a = pkts.intern(pkt(2));
        let b = pkts.intern(pkt(1));
        let c = pkts.intern(pkt(2));

        let result = InjectionResult::new(vec![a, b, c], false);
        let seqs: Vec<u32> = result.recv_pkts().iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn results_deduplicate_by_identity() {
        let mut pkts: Interner<Packet> = Interner::new();
        let mut irs: Interner<InjectionResult> = Interner::new();

        let r1 = irs.intern(InjectionResult::new(vec![pkts.intern(pkt(1))], false));
        let r1_dup = r1.clone();
        let r2 = irs.intern(InjectionResult::new(vec![], true));

        let mut results = InjectionResults::new();
        results.add(r1);
        results.add(r1_dup);
        results.add(r2);
        assert_eq!(results.len(), 2);
    }
}
