// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Packet traversal histories.
//!
//! A [`NodePacketHistory`] is an immutable singly-linked list of the packets
//! injected into one middlebox, newest first; `None` is the empty history. A
//! [`PacketHistory`] maps every middlebox to its current node history. Both
//! are interned, so the partial order "extends" can be decided by pointer
//! walks alone.

use crate::index::NodeIndex;
use crate::packet::Packet;
use std::collections::BTreeMap;
use storage::Interned;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodePacketHistory {
    pub last_pkt: Interned<Packet>,
    pub prev: Option<Interned<NodePacketHistory>>,
}

impl NodePacketHistory {
    #[must_use]
    pub fn new(last_pkt: Interned<Packet>, prev: Option<Interned<NodePacketHistory>>) -> Self {
        Self { last_pkt, prev }
    }

    /// All packets on the chain, oldest first.
    #[must_use]
    pub fn packets(&self) -> Vec<Interned<Packet>> {
        self.packets_since(None)
    }

    /// Packets strictly after `start` (oldest first). With `start = None`,
    /// the whole chain.
    #[must_use]
    pub fn packets_since(&self, start: Option<&Interned<NodePacketHistory>>) -> Vec<Interned<Packet>> {
        let mut pkts = Vec::new();
        let mut cur = Some(self);
        while let Some(nph) = cur {
            if let Some(start) = start {
                if std::ptr::eq(nph, start.as_ref()) {
                    break;
                }
            }
            pkts.push(nph.last_pkt.clone());
            cur = nph.prev.as_deref();
        }
        pkts.reverse();
        pkts
    }

    /// Chain length; never zero, the empty history is `None` at the callers.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = Some(self);
        while let Some(nph) = cur {
            n += 1;
            cur = nph.prev.as_deref();
        }
        n
    }
}

/// Whether `longer` extends `shorter`, i.e. walking `prev` pointers from
/// `longer` reaches `shorter`. Every history extends the empty history.
#[must_use]
pub fn extends(
    longer: Option<&Interned<NodePacketHistory>>,
    shorter: Option<&Interned<NodePacketHistory>>,
) -> bool {
    let Some(shorter) = shorter else {
        return true;
    };
    let mut cur = longer.cloned();
    while let Some(nph) = cur {
        if nph.ptr_eq(shorter) {
            return true;
        }
        cur = nph.prev.clone();
    }
    false
}

/// Per-middlebox histories for the whole network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PacketHistory {
    tbl: BTreeMap<NodeIndex, Option<Interned<NodePacketHistory>>>,
}

impl PacketHistory {
    /// An empty history covering the given middleboxes.
    pub fn new(middleboxes: impl IntoIterator<Item = NodeIndex>) -> Self {
        Self {
            tbl: middleboxes.into_iter().map(|mb| (mb, None)).collect(),
        }
    }

    /// Current history of a middlebox. `None` both for an untouched middlebox
    /// and for a node that is not a middlebox at all.
    #[must_use]
    pub fn node_pkt_hist(&self, mb: NodeIndex) -> Option<&Interned<NodePacketHistory>> {
        self.tbl.get(&mb).and_then(|h| h.as_ref())
    }

    pub fn set_node_pkt_hist(&mut self, mb: NodeIndex, nph: Option<Interned<NodePacketHistory>>) {
        self.tbl.insert(mb, nph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ProtoState;
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
    fn chain_walks_terminate_and_order_oldest_first() {
        let mut pkts: Interner<Packet> = Interner::new();
        let mut hists: Interner<NodePacketHistory> = Interner::new();

        let h1 = hists.intern(NodePacketHistory::new(pkts.intern(pkt(1)), None));
        let h2 = hists.intern(NodePacketHistory::new(pkts.intern(pkt(2)), Some(h1.clone())));
        let h3 = hists.intern(NodePacketHistory::new(pkts.intern(pkt(3)), Some(h2.clone())));

        assert_eq!(h3.len(), 3);
        let seqs: Vec<u32> = h3.packets().iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let tail: Vec<u32> = h3.packets_since(Some(&h1)).iter().map(|p| p.seq).collect();
        assert_eq!(tail, vec![2, 3]);
        assert!(h3.packets_since(Some(&h3)).is_empty());
    }

    #[test]
    fn extends_is_a_prefix_test() {
        let mut pkts: Interner<Packet> = Interner::new();
        let mut hists: Interner<NodePacketHistory> = Interner::new();

        let h1 = hists.intern(NodePacketHistory::new(pkts.intern(pkt(1)), None));
        let h2 = hists.intern(NodePacketHistory::new(pkts.intern(pkt(2)), Some(h1.clone())));
        let other = hists.intern(NodePacketHistory::new(pkts.intern(pkt(9)), None));

        assert!(extends(Some(&h2), Some(&h1)));
        assert!(extends(Some(&h2), Some(&h2)));
        assert!(extends(Some(&h2), None));
        assert!(!extends(Some(&h1), Some(&h2)));
        assert!(!extends(Some(&h2), Some(&other)));
        assert!(extends(None, None));
    }

    #[test]
    fn interning_makes_equal_chains_identical() {
        let mut pkts: Interner<Packet> = Interner::new();
        let mut hists: Interner<NodePacketHistory> = Interner::new();

        let p = pkts.intern(pkt(7));
        let a = hists.intern(NodePacketHistory::new(p.clone(), None));
        let b = hists.intern(NodePacketHistory::new(p, None));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn packet_history_tracks_middleboxes() {
        let mut pkts: Interner<Packet> = Interner::new();
        let mut hists: Interner<NodePacketHistory> = Interner::new();

        let mb = NodeIndex::new(3);
        let mut ph = PacketHistory::new([mb]);
        assert!(ph.node_pkt_hist(mb).is_none());

        let h = hists.intern(NodePacketHistory::new(pkts.intern(pkt(1)), None));
        ph.set_node_pkt_hist(mb, Some(h.clone()));
        assert!(ph.node_pkt_hist(mb).unwrap().ptr_eq(&h));
    }
}
