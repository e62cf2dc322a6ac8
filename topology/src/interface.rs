// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use net::ip::{IpInterface, IpNetwork, Ipv4Address};
use std::fmt::{self, Display};

/// A single port on a node: either an L3 interface carrying an address, or a
/// switchport participating in an L2 flood domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    name: String,
    ipv4: Option<IpInterface>,
}

impl Interface {
    #[must_use]
    pub fn l3(name: &str, ipv4: IpInterface) -> Self {
        Self {
            name: name.to_owned(),
            ipv4: Some(ipv4),
        }
    }

    #[must_use]
    pub fn switchport(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ipv4: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_l2(&self) -> bool {
        self.ipv4.is_none()
    }

    /// Address of an L3 interface. Callers only ask after checking
    /// [`Interface::is_l2`]; switchports have no address.
    #[must_use]
    pub fn addr(&self) -> Option<Ipv4Address> {
        self.ipv4.map(|i| i.addr())
    }

    #[must_use]
    pub fn network(&self) -> Option<IpNetwork> {
        self.ipv4.map(|i| i.network())
    }

    #[must_use]
    pub fn prefix_length(&self) -> Option<u8> {
        self.ipv4.map(|i| i.prefix_length())
    }
}

impl Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ipv4 {
            Some(ip) => write!(f, "{} ({})", self.name, ip),
            None => write!(f, "{} (switchport)", self.name),
        }
    }
}
