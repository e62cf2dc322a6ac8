// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::middlebox::MiddleboxDef;
use crate::rib::RoutingTable;
use net::index::{IntfIndex, NodeIndex};
use net::ip::Ipv4Address;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

/// One network element. A plain node forwards according to its routing
/// table; a node carrying a [`MiddleboxDef`] forwards according to a live
/// emulated appliance.
#[derive(Debug)]
pub struct Node {
    name: String,
    middlebox: Option<MiddleboxDef>,
    intfs: BTreeMap<String, IntfIndex>,
    intfs_l3: BTreeMap<Ipv4Address, IntfIndex>,
    intfs_l2: BTreeSet<IntfIndex>,
    rib: RoutingTable,
    peers: BTreeMap<IntfIndex, (NodeIndex, IntfIndex)>,
}

impl Node {
    #[must_use]
    pub fn new(name: &str, middlebox: Option<MiddleboxDef>) -> Self {
        Self {
            name: name.to_owned(),
            middlebox,
            intfs: BTreeMap::new(),
            intfs_l3: BTreeMap::new(),
            intfs_l2: BTreeSet::new(),
            rib: RoutingTable::new(),
            peers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_middlebox(&self) -> bool {
        self.middlebox.is_some()
    }

    #[must_use]
    pub fn middlebox(&self) -> Option<&MiddleboxDef> {
        self.middlebox.as_ref()
    }

    #[must_use]
    pub fn rib(&self) -> &RoutingTable {
        &self.rib
    }

    pub fn rib_mut(&mut self) -> &mut RoutingTable {
        &mut self.rib
    }

    #[must_use]
    pub fn has_ip(&self, addr: Ipv4Address) -> bool {
        self.intfs_l3.contains_key(&addr)
    }

    #[must_use]
    pub fn intf_by_name(&self, name: &str) -> Option<IntfIndex> {
        self.intfs.get(name).copied()
    }

    #[must_use]
    pub fn intf_by_addr(&self, addr: Ipv4Address) -> Option<IntfIndex> {
        self.intfs_l3.get(&addr).copied()
    }

    pub fn intfs(&self) -> impl Iterator<Item = IntfIndex> + '_ {
        self.intfs.values().copied()
    }

    #[must_use]
    pub fn intfs_l3(&self) -> &BTreeMap<Ipv4Address, IntfIndex> {
        &self.intfs_l3
    }

    #[must_use]
    pub fn intfs_l2(&self) -> &BTreeSet<IntfIndex> {
        &self.intfs_l2
    }

    /// The active peer across the link on `intf`, if the port is wired.
    #[must_use]
    pub fn peer(&self, intf: IntfIndex) -> Option<(NodeIndex, IntfIndex)> {
        self.peers.get(&intf).copied()
    }

    pub(crate) fn register_intf_name(&mut self, name: &str, idx: IntfIndex) -> bool {
        self.intfs.insert(name.to_owned(), idx).is_none()
    }

    pub(crate) fn register_intf_l3(&mut self, addr: Ipv4Address, idx: IntfIndex) -> bool {
        self.intfs_l3.insert(addr, idx).is_none()
    }

    pub(crate) fn register_intf_l2(&mut self, idx: IntfIndex) {
        self.intfs_l2.insert(idx);
    }

    pub(crate) fn register_peer(&mut self, intf: IntfIndex, peer: (NodeIndex, IntfIndex)) -> bool {
        self.peers.insert(intf, peer).is_none()
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
