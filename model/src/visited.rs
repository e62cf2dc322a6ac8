// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The hop set tracked by the loop invariant.

use ec::EcIndex;
use net::index::NodeIndex;
use std::collections::BTreeSet;

pub type Hop = (EcIndex, u16, NodeIndex);

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VisitedHops {
    hops: BTreeSet<Hop>,
}

impl VisitedHops {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn visited(&self, hop: &Hop) -> bool {
        self.hops.contains(hop)
    }

    /// A copy with `hop` added. Callers check [`VisitedHops::visited`]
    /// first; adding a hop twice is the loop violation itself.
    #[must_use]
    pub fn with_hop(&self, hop: Hop) -> Self {
        let mut next = self.clone();
        next.hops.insert(hop);
        next
    }
}
