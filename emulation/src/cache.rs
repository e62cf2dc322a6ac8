// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Memoised injection outcomes.
//!
//! Keyed by `(middlebox, node packet history)`, both interned, so lookups
//! reduce to pointer comparisons. Appliance behavior is assumed
//! deterministic given identical history (that is what the rewind protocol
//! maintains), which is what makes this cache sound.

use crate::manager::HistKey;
use crate::result::InjectionResults;
use ahash::AHashMap;
use net::index::NodeIndex;
use storage::Interned;

#[derive(Default)]
pub struct InjectionCache {
    cache: AHashMap<(NodeIndex, HistKey), Interned<InjectionResults>>,
}

impl InjectionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mb: NodeIndex, nph: HistKey, results: Interned<InjectionResults>) {
        self.cache.insert((mb, nph), results);
    }

    #[must_use]
    pub fn get(&self, mb: NodeIndex, nph: &HistKey) -> Option<&Interned<InjectionResults>> {
        self.cache.get(&(mb, nph.clone()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn reset(&mut self) {
        self.cache.clear();
    }
}
