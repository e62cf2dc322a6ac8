// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Per-node counters of delivered connections, for the load-balance and
//! one-request invariants.

use net::index::NodeIndex;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ReachCounts {
    counts: BTreeMap<NodeIndex, u32>,
}

impl ReachCounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self, node: NodeIndex) -> u32 {
        self.counts.get(&node).copied().unwrap_or(0)
    }

    /// A copy with `node`'s counter bumped.
    #[must_use]
    pub fn increased(&self, node: NodeIndex) -> Self {
        let mut next = self.clone();
        *next.counts.entry(node).or_insert(0) += 1;
        next
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Variance-to-mean ratio of the counters across `nodes`. Zero mean
    /// yields zero dispersion.
    #[must_use]
    pub fn dispersion_index(&self, nodes: impl IntoIterator<Item = NodeIndex>) -> f64 {
        let counts: Vec<f64> = nodes.into_iter().map(|n| f64::from(self.count(n))).collect();
        if counts.is_empty() {
            return 0.0;
        }
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        if mean == 0.0 {
            return 0.0;
        }
        let variance =
            counts.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / counts.len() as f64;
        variance / mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispersion_of_even_spread_is_zero() {
        let nodes: Vec<NodeIndex> = (0..3).map(NodeIndex::new).collect();
        let mut rc = ReachCounts::new();
        for n in &nodes {
            rc = rc.increased(*n);
        }
        assert_eq!(rc.total(), 3);
        assert!(rc.dispersion_index(nodes.iter().copied()) < f64::EPSILON);
    }

    #[test]
    fn dispersion_of_single_backend_pileup() {
        let nodes: Vec<NodeIndex> = (0..3).map(NodeIndex::new).collect();
        let mut rc = ReachCounts::new();
        for _ in 0..3 {
            rc = rc.increased(nodes[0]);
        }
        // counts (3,0,0): mean 1, variance 2, index 2.0
        let idx = rc.dispersion_index(nodes.iter().copied());
        assert!((idx - 2.0).abs() < f64::EPSILON);
    }
}
