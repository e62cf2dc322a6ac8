// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use net::index::{IntfIndex, NodeIndex};
use net::ip::Ipv4Address;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LanIndex(u32);

impl LanIndex {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One L2 flood domain: the transitive closure of ports reachable through
/// switchports, with the `dst_ip -> (l3 node, l3 intf)` map used for
/// ARP-style resolution of the final L3 hop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct L2Lan {
    endpoints: BTreeSet<(NodeIndex, IntfIndex)>,
    l3_endpoints: BTreeMap<Ipv4Address, (NodeIndex, IntfIndex)>,
}

impl L2Lan {
    pub(crate) fn add_endpoint(&mut self, node: NodeIndex, intf: IntfIndex) -> bool {
        self.endpoints.insert((node, intf))
    }

    pub(crate) fn add_l3_endpoint(&mut self, addr: Ipv4Address, node: NodeIndex, intf: IntfIndex) {
        self.l3_endpoints.insert(addr, (node, intf));
    }

    #[must_use]
    pub fn endpoints(&self) -> &BTreeSet<(NodeIndex, IntfIndex)> {
        &self.endpoints
    }

    #[must_use]
    pub fn find_l3_endpoint(&self, dst: Ipv4Address) -> Option<(NodeIndex, IntfIndex)> {
        self.l3_endpoints.get(&dst).copied()
    }
}
