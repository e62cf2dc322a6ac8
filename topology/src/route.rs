// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use net::ip::{IpNetwork, Ipv4Address};
use std::cmp::Ordering;
use std::fmt::{self, Display};

/// Administrative distance of connected routes.
pub const ADM_DIST_CONNECTED: u8 = 0;
/// Default administrative distance of static routes.
pub const ADM_DIST_STATIC: u8 = 1;

/// One routing entry. Routes are ordered for longest-prefix-first iteration:
/// prefix length descending, then network address ascending. Route equality
/// (for the RIB multiset) is by network only; `has_same_path` additionally
/// compares the forwarding action.
#[derive(Debug, Clone)]
pub struct Route {
    network: IpNetwork,
    next_hop: Option<Ipv4Address>,
    egress_intf: Option<String>,
    adm_dist: u8,
}

impl Route {
    #[must_use]
    pub fn new(
        network: IpNetwork,
        next_hop: Option<Ipv4Address>,
        egress_intf: Option<String>,
        adm_dist: u8,
    ) -> Self {
        Self {
            network,
            next_hop,
            egress_intf,
            adm_dist,
        }
    }

    /// The directly connected route of an L3 interface.
    #[must_use]
    pub fn connected(network: IpNetwork, addr: Ipv4Address, intf_name: &str) -> Self {
        Self {
            network,
            next_hop: Some(addr),
            egress_intf: Some(intf_name.to_owned()),
            adm_dist: ADM_DIST_CONNECTED,
        }
    }

    #[must_use]
    pub fn network(&self) -> IpNetwork {
        self.network
    }

    #[must_use]
    pub fn next_hop(&self) -> Option<Ipv4Address> {
        self.next_hop
    }

    #[must_use]
    pub fn egress_intf(&self) -> Option<&str> {
        self.egress_intf.as_deref()
    }

    #[must_use]
    pub fn adm_dist(&self) -> u8 {
        self.adm_dist
    }

    pub fn set_adm_dist(&mut self, adm_dist: u8) {
        self.adm_dist = adm_dist;
    }

    /// A route with an egress interface forwards out of a connected network;
    /// one without is resolved recursively through its next hop.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.egress_intf.is_some()
    }

    #[must_use]
    pub fn has_same_path(&self, other: &Route) -> bool {
        self.network == other.network && self.next_hop == other.next_hop
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.network == other.network
    }
}

impl Eq for Route {}

impl Ord for Route {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .network
            .prefix_length()
            .cmp(&self.network.prefix_length())
            .then_with(|| self.network.addr().cmp(&other.network.addr()))
    }
}

impl PartialOrd for Route {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)?;
        if let Some(nh) = self.next_hop {
            write!(f, " --> {nh}")?;
        }
        if let Some(intf) = &self.egress_intf {
            write!(f, " dev {intf}")?;
        }
        write!(f, " [{}]", self.adm_dist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(net: &str) -> Route {
        Route::new(net.parse().unwrap(), None, Some("eth0".into()), 1)
    }

    #[test]
    fn longest_prefix_sorts_first() {
        let mut routes = vec![route("10.0.0.0/8"), route("10.1.0.0/16"), route("0.0.0.0/0")];
        routes.sort();
        let prefixes: Vec<u8> = routes
            .iter()
            .map(|r| r.network().prefix_length())
            .collect();
        assert_eq!(prefixes, vec![16, 8, 0]);
    }

    #[test]
    fn equality_is_by_network_only() {
        let a = Route::new("10.0.0.0/24".parse().unwrap(), Some("10.0.1.1".parse().unwrap()), None, 1);
        let b = Route::new("10.0.0.0/24".parse().unwrap(), Some("10.0.2.1".parse().unwrap()), None, 5);
        assert_eq!(a, b);
        assert!(!a.has_same_path(&b));
    }
}
