// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use net::index::{IntfIndex, NodeIndex};
use std::fmt::{self, Display};

/// An unordered pair of `(node, interface)` endpoints, stored canonically so
/// the link set has a single representative per physical link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Link {
    node1: NodeIndex,
    intf1: IntfIndex,
    node2: NodeIndex,
    intf2: IntfIndex,
}

impl Link {
    /// Build a link with its endpoints in canonical order.
    #[must_use]
    pub fn new(node1: NodeIndex, intf1: IntfIndex, node2: NodeIndex, intf2: IntfIndex) -> Self {
        if (node1, intf1) <= (node2, intf2) {
            Self {
                node1,
                intf1,
                node2,
                intf2,
            }
        } else {
            Self {
                node1: node2,
                intf1: intf2,
                node2: node1,
                intf2: intf1,
            }
        }
    }

    #[must_use]
    pub fn node1(&self) -> NodeIndex {
        self.node1
    }

    #[must_use]
    pub fn intf1(&self) -> IntfIndex {
        self.intf1
    }

    #[must_use]
    pub fn node2(&self) -> NodeIndex {
        self.node2
    }

    #[must_use]
    pub fn intf2(&self) -> IntfIndex {
        self.intf2
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} <--> {}:{}",
            self.node1, self.intf1, self.node2, self.intf2
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_canonicalised() {
        let a = Link::new(
            NodeIndex::new(2),
            IntfIndex::new(5),
            NodeIndex::new(1),
            IntfIndex::new(3),
        );
        let b = Link::new(
            NodeIndex::new(1),
            IntfIndex::new(3),
            NodeIndex::new(2),
            IntfIndex::new(5),
        );
        assert_eq!(a, b);
        assert_eq!(a.node1(), NodeIndex::new(1));
    }
}
