// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Per-node routing table: a multiset of routes keyed by network, with
//! administrative-distance preference and ECMP groups for equal-cost
//! distinct paths.

use crate::route::Route;
use net::ip::{IpNetwork, Ipv4Address};
use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Map key preserving the route ordering (prefix length descending, network
/// address ascending), so iteration visits longest prefixes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NetKey(IpNetwork);

impl Ord for NetKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .0
            .prefix_length()
            .cmp(&self.0.prefix_length())
            .then_with(|| self.0.addr().cmp(&other.0.addr()))
    }
}

impl PartialOrd for NetKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    tbl: BTreeMap<NetKey, Vec<Route>>,
}

impl RoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route, applying the preference rules for its network group:
    /// a lower administrative distance replaces the group, a higher one is
    /// ignored, an equal one joins the ECMP group unless an identical path is
    /// already present.
    pub fn insert(&mut self, route: Route) {
        let group = self.tbl.entry(NetKey(route.network())).or_default();
        if let Some(first) = group.first() {
            if first.adm_dist() < route.adm_dist() {
                return;
            }
            if first.adm_dist() > route.adm_dist() {
                group.clear();
            } else if group.iter().any(|r| r.has_same_path(&route)) {
                return;
            }
        }
        group.push(route);
    }

    /// Longest-prefix match: the ECMP group of the most specific network
    /// containing `dst`, or an empty slice.
    #[must_use]
    pub fn lookup(&self, dst: Ipv4Address) -> &[Route] {
        for (key, group) in &self.tbl {
            if key.0.contains(dst) {
                return group;
            }
        }
        &[]
    }

    /// The ECMP group configured for exactly this network.
    #[must_use]
    pub fn lookup_network(&self, net: &IpNetwork) -> &[Route] {
        self.tbl.get(&NetKey(*net)).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.tbl.values().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tbl.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tbl.is_empty()
    }
}

impl Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for route in self.iter() {
            writeln!(f, "{route}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(net: &str, nh: &str, dist: u8) -> Route {
        Route::new(
            net.parse().unwrap(),
            Some(nh.parse().unwrap()),
            None,
            dist,
        )
    }

    #[test]
    fn lower_adm_dist_wins() {
        let mut rib = RoutingTable::new();
        rib.insert(route("10.0.0.0/24", "10.0.1.1", 10));
        rib.insert(route("10.0.0.0/24", "10.0.2.1", 1));
        let group = rib.lookup("10.0.0.5".parse().unwrap());
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].next_hop(), Some("10.0.2.1".parse().unwrap()));

        // higher distance afterwards is ignored
        rib.insert(route("10.0.0.0/24", "10.0.3.1", 200));
        assert_eq!(rib.lookup("10.0.0.5".parse().unwrap()).len(), 1);
    }

    #[test]
    fn equal_adm_dist_forms_ecmp_group() {
        let mut rib = RoutingTable::new();
        rib.insert(route("10.0.0.0/24", "10.0.1.1", 1));
        rib.insert(route("10.0.0.0/24", "10.0.2.1", 1));
        assert_eq!(rib.lookup("10.0.0.5".parse().unwrap()).len(), 2);
    }

    #[test]
    fn duplicate_path_is_suppressed() {
        let mut rib = RoutingTable::new();
        rib.insert(route("10.0.0.0/24", "10.0.1.1", 1));
        rib.insert(route("10.0.0.0/24", "10.0.1.1", 1));
        assert_eq!(rib.len(), 1);
    }

    #[test]
    fn lookup_prefers_the_longest_prefix() {
        let mut rib = RoutingTable::new();
        rib.insert(route("0.0.0.0/0", "10.0.0.1", 1));
        rib.insert(route("10.1.0.0/16", "10.0.0.2", 1));
        rib.insert(route("10.1.2.0/24", "10.0.0.3", 1));

        let hit = rib.lookup("10.1.2.3".parse().unwrap());
        assert_eq!(hit[0].next_hop(), Some("10.0.0.3".parse().unwrap()));
        let hit = rib.lookup("10.1.9.9".parse().unwrap());
        assert_eq!(hit[0].next_hop(), Some("10.0.0.2".parse().unwrap()));
        let hit = rib.lookup("8.8.8.8".parse().unwrap());
        assert_eq!(hit[0].next_hop(), Some("10.0.0.1".parse().unwrap()));
    }
}
