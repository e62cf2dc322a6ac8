// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Per-EC forwarding information resolved over the whole network.

use crate::unique::UniqueStorage;
use ec::{EcIndex, EqClassMgr};
use net::index::{IntfIndex, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use storage::Interned;
use topology::l2lan::LanIndex;
use topology::{IpNextHop, Network};

/// The dataplane for one equivalence class: every node's resolved next-hop
/// set, and each L2 interface's flood domain. Interned so equal FIBs share
/// storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fib {
    iptbl: BTreeMap<NodeIndex, BTreeSet<IpNextHop>>,
    l2tbl: BTreeMap<IntfIndex, LanIndex>,
}

impl Fib {
    #[must_use]
    pub fn lookup(&self, node: NodeIndex) -> &BTreeSet<IpNextHop> {
        static EMPTY: BTreeSet<IpNextHop> = BTreeSet::new();
        self.iptbl.get(&node).unwrap_or(&EMPTY)
    }

    #[must_use]
    pub fn l2_lan(&self, intf: IntfIndex) -> Option<LanIndex> {
        self.l2tbl.get(&intf).copied()
    }
}

impl Display for Fib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FIB:")?;
        for (node, nhs) in &self.iptbl {
            write!(f, "{node} -> [")?;
            for nh in nhs {
                write!(f, " ({}, {})", nh.l3_node, nh.l2_node)?;
            }
            writeln!(f, " ]")?;
        }
        Ok(())
    }
}

/// Resolve the FIB for `ec`'s representative address and intern it.
pub fn build_fib(
    network: &Network,
    ecs: &EqClassMgr,
    storage: &mut UniqueStorage,
    ec: EcIndex,
) -> Interned<Fib> {
    let addr = ecs.ec(ec).representative_addr();
    let mut fib = Fib::default();
    for (node_idx, node) in network.nodes() {
        fib.iptbl.insert(node_idx, network.ipnhs(node_idx, addr));
        for intf in node.intfs_l2() {
            if let Some(lan) = network.lan_index_of_intf(*intf) {
                fib.l2tbl.insert(*intf, lan);
            }
        }
    }
    storage.fibs.intern(fib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use topology::{Interface, Node};

    #[test]
    fn equal_fibs_intern_to_one_allocation() {
        let mut network = Network::new();
        let r0 = network.add_node(Node::new("r0", None)).unwrap();
        let r1 = network.add_node(Node::new("r1", None)).unwrap();
        let i0 = network
            .add_interface(r0, Interface::l3("eth0", "192.168.1.11/24".parse().unwrap()))
            .unwrap();
        let i1 = network
            .add_interface(r1, Interface::l3("eth0", "192.168.1.22/24".parse().unwrap()))
            .unwrap();
        network.add_link(r0, i0, r1, i1).unwrap();
        network.grow_l2_lans();

        let mut ecs = EqClassMgr::new();
        ecs.compute_initial_ecs(&network, std::iter::empty::<&topology::Route>());
        let ec = ecs.find_ec("192.168.1.22".parse().unwrap()).unwrap();

        let mut storage = UniqueStorage::new();
        let a = build_fib(&network, &ecs, &mut storage, ec);
        let b = build_fib(&network, &ecs, &mut storage, ec);
        assert!(a.ptr_eq(&b));

        // r0 forwards toward r1, r1 accepts locally
        assert_eq!(a.lookup(r0).len(), 1);
        assert_eq!(a.lookup(r1).iter().next().unwrap(), &IpNextHop::accept(r1));
    }
}
