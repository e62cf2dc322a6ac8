// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The equivalence-class engine.
//!
//! Every address range a forwarding decision can depend on (route prefixes,
//! interface addresses, invariant destination ranges, middlebox-scraped
//! values) is folded into a partition of the IPv4 destination space. Two
//! addresses in the same class are forwarded identically by every node, so
//! the search explores one representative per class.
//!
//! Classes and ranges live in an arena owned by the manager; everything
//! refers to classes by [`EcIndex`].

use ahash::AHashSet;
use net::ip::{IpNetwork, IpRange, Ipv4Address};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use thiserror::Error;
use topology::{Network, Route};
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EcError {
    #[error("cannot find the EC of {0}")]
    NoEcForAddress(Ipv4Address),
}

/// Arena index of an equivalence class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EcIndex(u32);

impl EcIndex {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for EcIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EC#{}", self.0)
    }
}

/// A set of disjoint address ranges treated identically by every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EqClass {
    ranges: BTreeSet<IpRange>,
}

impl EqClass {
    #[must_use]
    pub fn ranges(&self) -> &BTreeSet<IpRange> {
        &self.ranges
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[must_use]
    pub fn contains(&self, addr: Ipv4Address) -> bool {
        self.ranges.iter().any(|r| r.contains(addr))
    }

    /// The representative address explored for this class.
    #[must_use]
    pub fn representative_addr(&self) -> Ipv4Address {
        // classes are never empty once published by the manager
        self.ranges
            .first()
            .map(|r| r.lb())
            .unwrap_or_else(|| Ipv4Address::new(0))
    }
}

impl Display for EqClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for range in &self.ranges {
            write!(f, " {range}")?;
        }
        write!(f, " }}")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct RangeEntry {
    ub: Ipv4Address,
    ec: EcIndex,
}

/// Owner of the partition: every allocated range (keyed by lower bound) and
/// every class, plus the subset of classes overlapping a node-owned address
/// and the scraped port set.
#[derive(Debug, Default)]
pub struct EqClassMgr {
    allranges: BTreeMap<Ipv4Address, RangeEntry>,
    classes: Vec<EqClass>,
    owned: AHashSet<EcIndex>,
    ports: BTreeSet<u16>,
}

impl EqClassMgr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.allranges.clear();
        self.classes.clear();
        self.owned.clear();
        self.ports.clear();
    }

    #[must_use]
    pub fn ec(&self, idx: EcIndex) -> &EqClass {
        &self.classes[idx.index()]
    }

    #[must_use]
    pub fn num_ecs(&self) -> usize {
        self.classes.iter().filter(|c| !c.is_empty()).count()
    }

    #[must_use]
    pub fn is_owned(&self, idx: EcIndex) -> bool {
        self.owned.contains(&idx)
    }

    /// Scraped ports plus the representative "all remaining ports" port.
    #[must_use]
    pub fn ports(&self) -> &BTreeSet<u16> {
        &self.ports
    }

    /// The unique class containing `addr`. An address outside every added
    /// range is a configuration-coverage error.
    pub fn find_ec(&self, addr: Ipv4Address) -> Result<EcIndex, EcError> {
        self.range_at(addr)
            .map(|(_, entry)| entry.ec)
            .ok_or(EcError::NoEcForAddress(addr))
    }

    /// All classes any of whose ranges intersect `range`.
    #[must_use]
    pub fn overlapped_ecs(&self, range: &IpRange, owned_only: bool) -> BTreeSet<EcIndex> {
        let mut out = BTreeSet::new();
        for (_, entry) in self.ranges_overlapping(range) {
            if !owned_only || self.owned.contains(&entry.ec) {
                out.insert(entry.ec);
            }
        }
        out
    }

    pub fn add_network(&mut self, net: IpNetwork) {
        self.add_ec(IpRange::from(net), false);
    }

    pub fn add_addr(&mut self, addr: Ipv4Address, owned: bool) {
        self.add_ec(IpRange::host(addr), owned);
    }

    /// Fold a new range into the partition, splitting intersected classes so
    /// the result is again a disjoint covering.
    pub fn add_ec(&mut self, range: IpRange, owned: bool) {
        let overlapped = self.overlapped_ecs(&range, false);
        for ec in overlapped {
            if !self.class_inside(ec, &range) {
                self.split_intersected_ec(ec, &range, owned);
            } else if owned {
                self.owned.insert(ec);
            }
        }
        self.add_non_overlapped_ec(&range, owned);
    }

    /// Whether every range of `ec` lies inside `range`.
    fn class_inside(&self, ec: EcIndex, range: &IpRange) -> bool {
        self.classes[ec.index()]
            .ranges
            .iter()
            .all(|r| range.contains_range(r))
    }

    /// Carve the portion of `ec` inside `range` into a new class; the
    /// portions outside stay behind. Ownership survives the split on both
    /// sides, and the new class additionally inherits `owned`.
    fn split_intersected_ec(&mut self, ec: EcIndex, range: &IpRange, owned: bool) {
        let new_ec = EcIndex::new(self.classes.len() as u32);
        self.classes.push(EqClass::default());

        let orig_ranges: Vec<IpRange> = self.classes[ec.index()].ranges.iter().copied().collect();
        for ecrange in orig_ranges {
            if !ecrange.overlaps(range) {
                continue; // stays in the original class untouched
            }
            self.allranges.remove(&ecrange.lb());
            self.classes[ec.index()].ranges.remove(&ecrange);

            let mut inner = ecrange;
            if ecrange.lb() < range.lb() {
                let lower = IpRange::new(ecrange.lb(), range.lb() - 1)
                    .unwrap_or_else(|_| unreachable!());
                self.insert_range(lower, ec);
                inner = IpRange::new(range.lb(), inner.ub()).unwrap_or_else(|_| unreachable!());
            }
            if range.ub() < ecrange.ub() {
                let upper = IpRange::new(range.ub() + 1, ecrange.ub())
                    .unwrap_or_else(|_| unreachable!());
                self.insert_range(upper, ec);
                inner = IpRange::new(inner.lb(), range.ub()).unwrap_or_else(|_| unreachable!());
            }
            self.insert_range(inner, new_ec);
        }

        debug_assert!(!self.classes[new_ec.index()].is_empty());
        if owned || self.owned.contains(&ec) {
            self.owned.insert(new_ec);
        }
    }

    /// Collect the sub-ranges of `range` not yet covered by any allocated
    /// range into one new class.
    fn add_non_overlapped_ec(&mut self, range: &IpRange, owned: bool) {
        let mut gaps: Vec<IpRange> = Vec::new();
        let mut lb = range.lb();
        let mut covered_to_max = false;
        for (start, entry) in self.ranges_overlapping(range) {
            if lb < start {
                gaps.push(IpRange::new(lb, start - 1).unwrap_or_else(|_| unreachable!()));
            }
            if entry.ub == Ipv4Address::new(u32::MAX) {
                covered_to_max = true;
                break;
            }
            lb = lb.max(entry.ub + 1);
        }
        if !covered_to_max && lb <= range.ub() {
            gaps.push(IpRange::new(lb, range.ub()).unwrap_or_else(|_| unreachable!()));
        }

        if gaps.is_empty() {
            return;
        }
        let new_ec = EcIndex::new(self.classes.len() as u32);
        self.classes.push(EqClass::default());
        for gap in gaps {
            self.insert_range(gap, new_ec);
        }
        if owned {
            self.owned.insert(new_ec);
        }
    }

    fn insert_range(&mut self, range: IpRange, ec: EcIndex) {
        self.allranges.insert(
            range.lb(),
            RangeEntry {
                ub: range.ub(),
                ec,
            },
        );
        self.classes[ec.index()].ranges.insert(range);
    }

    /// The allocated range containing `addr`, if any.
    fn range_at(&self, addr: Ipv4Address) -> Option<(Ipv4Address, RangeEntry)> {
        self.allranges
            .range(..=addr)
            .next_back()
            .filter(|(_, entry)| entry.ub >= addr)
            .map(|(lb, entry)| (*lb, *entry))
    }

    /// Allocated ranges intersecting `range`, in address order.
    fn ranges_overlapping(&self, range: &IpRange) -> Vec<(Ipv4Address, RangeEntry)> {
        let mut out = Vec::new();
        if let Some((lb, entry)) = self.range_at(range.lb()) {
            out.push((lb, entry));
        }
        if range.lb() < range.ub() {
            for (lb, entry) in self.allranges.range(range.lb() + 1..=range.ub()) {
                out.push((*lb, *entry));
            }
        }
        out
    }

    /// Seed the partition from the network and the pending openflow updates:
    /// interface addresses (owned), route prefixes, update prefixes, and
    /// middlebox-scraped prefixes/addresses/ports. Finally picks one random
    /// non-clashing port standing for "all remaining ports".
    pub fn compute_initial_ecs<'a>(
        &mut self,
        network: &Network,
        openflow_updates: impl IntoIterator<Item = &'a Route>,
    ) {
        for (_, node) in network.nodes() {
            for addr in node.intfs_l3().keys() {
                self.add_addr(*addr, true);
            }
            for route in node.rib().iter() {
                self.add_network(route.network());
            }
        }

        for route in openflow_updates {
            self.add_network(route.network());
        }

        for mb in network.middleboxes() {
            let Some(def) = network.node(mb).middlebox() else {
                continue;
            };
            for prefix in &def.ec_ip_prefixes {
                self.add_network(*prefix);
            }
            for addr in &def.ec_ip_addrs {
                self.add_addr(*addr, false);
            }
            self.ports.extend(def.ec_ports.iter().copied());
        }

        // one representative port for everything not named anywhere
        let mut rng = rand::rng();
        loop {
            let port: u16 = rng.random_range(10..=49151);
            if !self.ports.contains(&port) {
                self.ports.insert(port);
                break;
            }
        }

        debug!("{} ECs, {} ports", self.num_ecs(), self.ports.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Address {
        s.parse().unwrap()
    }

    fn range(lb: &str, ub: &str) -> IpRange {
        IpRange::new(addr(lb), addr(ub)).unwrap()
    }

    /// Every address of every added range must land in exactly one class,
    /// and distinct classes must not overlap.
    fn check_partition(mgr: &EqClassMgr, probes: &[&str]) {
        for probe in probes {
            let ec = mgr.find_ec(addr(probe)).unwrap();
            let holders: Vec<EcIndex> = (0..mgr.classes.len())
                .map(|i| EcIndex::new(i as u32))
                .filter(|i| mgr.ec(*i).contains(addr(probe)))
                .collect();
            assert_eq!(holders, vec![ec], "probe {probe}");
        }
    }

    #[test]
    fn disjoint_ranges_make_one_class_each() {
        let mut mgr = EqClassMgr::new();
        mgr.add_ec(range("10.0.0.0", "10.0.0.255"), false);
        mgr.add_ec(range("10.0.2.0", "10.0.2.255"), false);
        assert_eq!(mgr.num_ecs(), 2);
        check_partition(&mgr, &["10.0.0.7", "10.0.2.9"]);
        assert!(mgr.find_ec(addr("10.0.1.0")).is_err());
    }

    #[test]
    fn contained_range_splits_the_class() {
        let mut mgr = EqClassMgr::new();
        mgr.add_ec(range("10.0.0.0", "10.0.0.255"), false);
        mgr.add_ec(range("10.0.0.16", "10.0.0.31"), false);

        let outer = mgr.find_ec(addr("10.0.0.1")).unwrap();
        let inner = mgr.find_ec(addr("10.0.0.20")).unwrap();
        let upper = mgr.find_ec(addr("10.0.0.200")).unwrap();
        assert_ne!(outer, inner);
        assert_eq!(outer, upper); // both leftover pieces stay together
        check_partition(&mgr, &["10.0.0.1", "10.0.0.16", "10.0.0.31", "10.0.0.32"]);
    }

    #[test]
    fn partially_overlapping_range_splits_and_fills() {
        let mut mgr = EqClassMgr::new();
        mgr.add_ec(range("10.0.0.0", "10.0.0.127"), false);
        mgr.add_ec(range("10.0.0.64", "10.0.0.200"), false);

        let left = mgr.find_ec(addr("10.0.0.10")).unwrap();
        let mid = mgr.find_ec(addr("10.0.0.100")).unwrap();
        let right = mgr.find_ec(addr("10.0.0.150")).unwrap();
        assert_ne!(left, mid);
        assert_ne!(mid, right);
        check_partition(&mgr, &["10.0.0.0", "10.0.0.64", "10.0.0.127", "10.0.0.128", "10.0.0.200"]);
    }

    #[test]
    fn re_adding_a_range_is_a_no_op() {
        let mut mgr = EqClassMgr::new();
        mgr.add_ec(range("10.0.0.0", "10.0.0.255"), false);
        let before = mgr.find_ec(addr("10.0.0.1")).unwrap();
        let count = mgr.num_ecs();

        mgr.add_ec(range("10.0.0.0", "10.0.0.255"), false);
        assert_eq!(mgr.num_ecs(), count);
        assert_eq!(mgr.find_ec(addr("10.0.0.1")).unwrap(), before);
    }

    #[test]
    fn ownership_survives_splitting() {
        let mut mgr = EqClassMgr::new();
        mgr.add_ec(range("10.0.0.0", "10.0.0.255"), true);
        mgr.add_ec(range("10.0.0.16", "10.0.0.31"), false);

        let outer = mgr.find_ec(addr("10.0.0.1")).unwrap();
        let inner = mgr.find_ec(addr("10.0.0.20")).unwrap();
        assert!(mgr.is_owned(outer));
        assert!(mgr.is_owned(inner));
    }

    #[test]
    fn overlapped_ecs_filters_by_ownership() {
        let mut mgr = EqClassMgr::new();
        mgr.add_ec(range("10.0.0.0", "10.0.0.127"), true);
        mgr.add_ec(range("10.0.0.128", "10.0.0.255"), false);

        let all = mgr.overlapped_ecs(&range("10.0.0.0", "10.0.0.255"), false);
        assert_eq!(all.len(), 2);
        let owned = mgr.overlapped_ecs(&range("10.0.0.0", "10.0.0.255"), true);
        assert_eq!(owned.len(), 1);
    }

    #[test]
    fn single_address_class() {
        let mut mgr = EqClassMgr::new();
        mgr.add_ec(range("0.0.0.0", "255.255.255.255"), false);
        mgr.add_addr(addr("192.168.1.22"), true);

        let host_ec = mgr.find_ec(addr("192.168.1.22")).unwrap();
        let rest = mgr.find_ec(addr("192.168.1.23")).unwrap();
        assert_ne!(host_ec, rest);
        assert!(mgr.is_owned(host_ec));
        assert_eq!(
            mgr.ec(host_ec).representative_addr(),
            addr("192.168.1.22")
        );
    }
}
