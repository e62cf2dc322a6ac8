// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Committed branch decisions, memoised by `(EC, node)`.
//!
//! Once a branch commits to one of several tied next hops at a node for an
//! EC, any later re-arrival at the same `(EC, node)` on the same execution
//! path must take the same next hop. This keeps forwarding
//! path-deterministic per tuple and lets the loop invariant see genuine
//! loops instead of branch interleavings.

use ec::EcIndex;
use net::index::NodeIndex;
use std::collections::BTreeMap;
use topology::IpNextHop;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Choices {
    map: BTreeMap<(EcIndex, NodeIndex), IpNextHop>,
}

impl Choices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, ec: EcIndex, node: NodeIndex) -> Option<&IpNextHop> {
        self.map.get(&(ec, node))
    }

    /// A copy with one more committed decision.
    #[must_use]
    pub fn with_choice(&self, ec: EcIndex, node: NodeIndex, choice: IpNextHop) -> Self {
        let mut next = self.clone();
        next.map.insert((ec, node), choice);
        next
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
