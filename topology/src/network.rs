// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The network graph and per-address next-hop resolution.

use crate::interface::Interface;
use crate::l2lan::{L2Lan, LanIndex};
use crate::link::Link;
use crate::node::Node;
use crate::route::Route;
use crate::TopologyError;
use ahash::AHashMap;
use net::index::{IntfIndex, NodeIndex};
use net::ip::Ipv4Address;
use std::collections::BTreeSet;
use tracing::debug;

/// A fully resolved IP next hop: the final L3 hop on the current flood
/// domain, and the immediate L2 hop the frame is handed to. A terminal
/// ("accept") next hop points at the node itself with no interfaces.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpNextHop {
    pub l3_node: NodeIndex,
    pub l3_intf: Option<IntfIndex>,
    pub l2_node: NodeIndex,
    pub l2_intf: Option<IntfIndex>,
}

impl IpNextHop {
    /// Terminal next hop: the packet is accepted by `node`.
    #[must_use]
    pub fn accept(node: NodeIndex) -> Self {
        Self {
            l3_node: node,
            l3_intf: None,
            l2_node: node,
            l2_intf: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Network {
    nodes: Vec<Node>,
    node_names: AHashMap<String, NodeIndex>,
    intfs: Vec<Interface>,
    intf_owner: Vec<NodeIndex>,
    links: BTreeSet<Link>,
    l2_lans: Vec<L2Lan>,
    lan_of_intf: Vec<Option<LanIndex>>,
}

impl Network {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeIndex, TopologyError> {
        if self.node_names.contains_key(node.name()) {
            return Err(TopologyError::DuplicateNode(node.name().to_owned()));
        }
        let idx = NodeIndex::new(self.nodes.len() as u32);
        self.node_names.insert(node.name().to_owned(), idx);
        self.nodes.push(node);
        Ok(idx)
    }

    pub fn add_interface(
        &mut self,
        node_idx: NodeIndex,
        intf: Interface,
    ) -> Result<IntfIndex, TopologyError> {
        let idx = IntfIndex::new(self.intfs.len() as u32);
        let node = &mut self.nodes[node_idx.index()];
        if !node.register_intf_name(intf.name(), idx) {
            return Err(TopologyError::DuplicateInterface(
                node.name().to_owned(),
                intf.name().to_owned(),
            ));
        }
        if let Some(addr) = intf.addr() {
            if !node.register_intf_l3(addr, idx) {
                return Err(TopologyError::DuplicateInterfaceIp(
                    node.name().to_owned(),
                    addr.to_string(),
                ));
            }
            // the directly connected route
            let network = intf.network().unwrap_or_else(|| unreachable!());
            node.rib_mut()
                .insert(Route::connected(network, addr, intf.name()));
        } else {
            node.register_intf_l2(idx);
        }
        self.intfs.push(intf);
        self.intf_owner.push(node_idx);
        self.lan_of_intf.push(None);
        Ok(idx)
    }

    pub fn add_link(
        &mut self,
        node1: NodeIndex,
        intf1: IntfIndex,
        node2: NodeIndex,
        intf2: IntfIndex,
    ) -> Result<(), TopologyError> {
        let link = Link::new(node1, intf1, node2, intf2);
        if !self.links.insert(link) {
            return Err(TopologyError::DuplicateLink(link.to_string()));
        }
        if !self.nodes[node1.index()].register_peer(intf1, (node2, intf2)) {
            return Err(TopologyError::DuplicatePeer(
                self.intfs[intf1.index()].name().to_owned(),
            ));
        }
        if !self.nodes[node2.index()].register_peer(intf2, (node1, intf1)) {
            return Err(TopologyError::DuplicatePeer(
                self.intfs[intf2.index()].name().to_owned(),
            ));
        }
        Ok(())
    }

    /// Discover the L2 flood domains. Must be called after all links are in
    /// place and before any next-hop resolution.
    pub fn grow_l2_lans(&mut self) {
        for start in 0..self.intfs.len() {
            let start_idx = IntfIndex::new(start as u32);
            if self.lan_of_intf[start].is_some() {
                continue;
            }
            let owner = self.intf_owner[start];
            if self.nodes[owner.index()].peer(start_idx).is_none() {
                continue; // unwired port, no domain
            }

            let lan_idx = LanIndex::new(self.l2_lans.len() as u32);
            let mut lan = L2Lan::default();
            let mut queue = vec![(owner, start_idx)];
            while let Some((node_idx, intf_idx)) = queue.pop() {
                if !lan.add_endpoint(node_idx, intf_idx) {
                    continue;
                }
                self.lan_of_intf[intf_idx.index()] = Some(lan_idx);
                let intf = &self.intfs[intf_idx.index()];
                if let Some(addr) = intf.addr() {
                    lan.add_l3_endpoint(addr, node_idx, intf_idx);
                } else {
                    // flood to the node's other switchports
                    for sibling in self.nodes[node_idx.index()].intfs_l2() {
                        queue.push((node_idx, *sibling));
                    }
                }
                if let Some(peer) = self.nodes[node_idx.index()].peer(intf_idx) {
                    queue.push(peer);
                }
            }
            debug!("L2 domain {}: {} endpoints", lan_idx.index(), lan.endpoints().len());
            self.l2_lans.push(lan);
        }
    }

    #[must_use]
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx.index()]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx.index()]
    }

    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.node_names.get(name).copied()
    }

    #[must_use]
    pub fn intf(&self, idx: IntfIndex) -> &Interface {
        &self.intfs[idx.index()]
    }

    #[must_use]
    pub fn intf_owner(&self, idx: IntfIndex) -> NodeIndex {
        self.intf_owner[idx.index()]
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeIndex::new(i as u32), n))
    }

    pub fn middleboxes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes().filter(|(_, n)| n.is_middlebox()).map(|(i, _)| i)
    }

    #[must_use]
    pub fn links(&self) -> &BTreeSet<Link> {
        &self.links
    }

    #[must_use]
    pub fn lan_of_intf(&self, intf: IntfIndex) -> Option<&L2Lan> {
        self.lan_of_intf[intf.index()].map(|lan| &self.l2_lans[lan.index()])
    }

    #[must_use]
    pub fn lan_index_of_intf(&self, intf: IntfIndex) -> Option<LanIndex> {
        self.lan_of_intf[intf.index()]
    }

    #[must_use]
    pub fn lan(&self, idx: LanIndex) -> &L2Lan {
        &self.l2_lans[idx.index()]
    }

    /// Resolve the IP next hops of `dst` on a pure-model node, recursing
    /// through non-connected routes until connected ones are reached.
    /// Middleboxes resolve by injection instead and always return the empty
    /// set here.
    #[must_use]
    pub fn ipnhs(&self, node_idx: NodeIndex, dst: Ipv4Address) -> BTreeSet<IpNextHop> {
        let mut out = BTreeSet::new();
        if self.nodes[node_idx.index()].is_middlebox() {
            return out;
        }
        let mut seen = BTreeSet::new();
        seen.insert(dst);
        self.ipnhs_rec(node_idx, dst, dst, &mut seen, &mut out);
        out
    }

    fn ipnhs_rec(
        &self,
        node_idx: NodeIndex,
        lookup: Ipv4Address,
        dst: Ipv4Address,
        seen: &mut BTreeSet<Ipv4Address>,
        out: &mut BTreeSet<IpNextHop>,
    ) {
        let node = &self.nodes[node_idx.index()];
        for route in node.rib().lookup(lookup) {
            if !route.is_connected() {
                // recursive route; resolve its next hop, guarding cycles
                if let Some(nh) = route.next_hop() {
                    if seen.insert(nh) {
                        self.ipnhs_rec(node_idx, nh, dst, seen, out);
                    }
                }
            } else if node.has_ip(dst) {
                out.insert(IpNextHop::accept(node_idx));
            } else {
                let Some(egress) = route.egress_intf().and_then(|n| node.intf_by_name(n)) else {
                    continue;
                };
                let Some((peer_node, peer_intf)) = node.peer(egress) else {
                    continue;
                };
                // the address resolved on the flood domain: a gateway next
                // hop if the route names one, the destination otherwise
                let own_addr = self.intfs[egress.index()].addr();
                let arp_key = match route.next_hop() {
                    Some(nh) if Some(nh) != own_addr => nh,
                    _ => lookup,
                };
                let Some(lan) = self.lan_of_intf(egress) else {
                    continue;
                };
                if let Some((l3_node, l3_intf)) = lan.find_l3_endpoint(arp_key) {
                    out.insert(IpNextHop {
                        l3_node,
                        l3_intf: Some(l3_intf),
                        l2_node: peer_node,
                        l2_intf: Some(peer_intf),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Route;

    /// r0 (192.168.1.11/24) <-> r1 (192.168.1.22/24)
    fn two_node_net() -> (Network, NodeIndex, NodeIndex) {
        let mut net = Network::new();
        let r0 = net.add_node(Node::new("r0", None)).unwrap();
        let r1 = net.add_node(Node::new("r1", None)).unwrap();
        let i0 = net
            .add_interface(r0, Interface::l3("eth0", "192.168.1.11/24".parse().unwrap()))
            .unwrap();
        let i1 = net
            .add_interface(r1, Interface::l3("eth0", "192.168.1.22/24".parse().unwrap()))
            .unwrap();
        net.add_link(r0, i0, r1, i1).unwrap();
        net.grow_l2_lans();
        (net, r0, r1)
    }

    #[test]
    fn direct_link_resolves_to_the_peer() {
        let (net, r0, r1) = two_node_net();
        let nhs = net.ipnhs(r0, "192.168.1.22".parse().unwrap());
        assert_eq!(nhs.len(), 1);
        let nh = nhs.iter().next().unwrap();
        assert_eq!(nh.l3_node, r1);
        assert_eq!(nh.l2_node, r1);
    }

    #[test]
    fn own_address_resolves_to_accept() {
        let (net, r0, _) = two_node_net();
        let nhs = net.ipnhs(r0, "192.168.1.11".parse().unwrap());
        assert_eq!(nhs.len(), 1);
        assert_eq!(*nhs.iter().next().unwrap(), IpNextHop::accept(r0));
    }

    #[test]
    fn switch_extends_the_flood_domain() {
        let mut net = Network::new();
        let a = net.add_node(Node::new("a", None)).unwrap();
        let sw = net.add_node(Node::new("sw", None)).unwrap();
        let b = net.add_node(Node::new("b", None)).unwrap();

        let ai = net
            .add_interface(a, Interface::l3("eth0", "10.0.0.1/24".parse().unwrap()))
            .unwrap();
        let s1 = net.add_interface(sw, Interface::switchport("swp1")).unwrap();
        let s2 = net.add_interface(sw, Interface::switchport("swp2")).unwrap();
        let bi = net
            .add_interface(b, Interface::l3("eth0", "10.0.0.2/24".parse().unwrap()))
            .unwrap();

        net.add_link(a, ai, sw, s1).unwrap();
        net.add_link(sw, s2, b, bi).unwrap();
        net.grow_l2_lans();

        let nhs = net.ipnhs(a, "10.0.0.2".parse().unwrap());
        assert_eq!(nhs.len(), 1);
        let nh = nhs.iter().next().unwrap();
        // L3 next hop is b; the immediate L2 hop is the switch.
        assert_eq!(nh.l3_node, b);
        assert_eq!(nh.l2_node, sw);
    }

    #[test]
    fn recursive_route_resolution_with_ecmp() {
        let mut net = Network::new();
        let a = net.add_node(Node::new("a", None)).unwrap();
        let b1 = net.add_node(Node::new("b1", None)).unwrap();
        let b2 = net.add_node(Node::new("b2", None)).unwrap();

        let a1 = net
            .add_interface(a, Interface::l3("eth1", "10.0.1.1/24".parse().unwrap()))
            .unwrap();
        let a2 = net
            .add_interface(a, Interface::l3("eth2", "10.0.2.1/24".parse().unwrap()))
            .unwrap();
        let b1i = net
            .add_interface(b1, Interface::l3("eth0", "10.0.1.2/24".parse().unwrap()))
            .unwrap();
        let b2i = net
            .add_interface(b2, Interface::l3("eth0", "10.0.2.2/24".parse().unwrap()))
            .unwrap();
        net.add_link(a, a1, b1, b1i).unwrap();
        net.add_link(a, a2, b2, b2i).unwrap();
        net.grow_l2_lans();

        // two equal-cost static routes to the same prefix
        net.node_mut(a).rib_mut().insert(Route::new(
            "8.8.8.0/24".parse().unwrap(),
            Some("10.0.1.2".parse().unwrap()),
            None,
            1,
        ));
        net.node_mut(a).rib_mut().insert(Route::new(
            "8.8.8.0/24".parse().unwrap(),
            Some("10.0.2.2".parse().unwrap()),
            None,
            1,
        ));

        let nhs = net.ipnhs(a, "8.8.8.8".parse().unwrap());
        let l3_nodes: Vec<NodeIndex> = nhs.iter().map(|nh| nh.l3_node).collect();
        assert_eq!(l3_nodes.len(), 2);
        assert!(l3_nodes.contains(&b1));
        assert!(l3_nodes.contains(&b2));
    }
}
