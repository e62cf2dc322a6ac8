// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Content-addressed storage for model-checker state components.
//!
//! The search keeps its state vector pointer-sized by interning every
//! heap-shaped component (FIBs, packet histories, candidate sets, choice maps
//! and so on) in per-type tables. Two structurally equal values intern to the
//! same allocation, so comparing and hashing a state degenerates to comparing
//! and hashing a handful of pointers.

use ahash::AHashSet;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// A handle to an interned value. Equality and hashing are by allocation
/// identity: for values obtained from the same [`Interner`], pointer equality
/// coincides with structural equality.
pub struct Interned<T>(Arc<T>);

impl<T> Interned<T> {
    /// Raw allocation address, usable as a dense ordering/grouping key.
    #[must_use]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Interned<T> {
    fn clone(&self) -> Self {
        Interned(Arc::clone(&self.0))
    }
}

impl<T> Deref for Interned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> AsRef<T> for Interned<T> {
    fn as_ref(&self) -> &T {
        &self.0
    }
}

impl<T> PartialEq for Interned<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Interned<T> {}

impl<T> Hash for Interned<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T> PartialOrd for Interned<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Interned<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T: Debug> Debug for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A typed intern table. `intern` is the only way to create [`Interned`]
/// handles, which is what makes their pointer identity meaningful.
pub struct Interner<T> {
    table: AHashSet<Arc<T>>,
}

impl<T: Eq + Hash> Interner<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: AHashSet::new(),
        }
    }

    /// Store a value, returning the canonical handle. If a structurally equal
    /// value is already resident, the new one is dropped and the resident
    /// handle is returned.
    pub fn intern(&mut self, value: T) -> Interned<T> {
        if let Some(existing) = self.table.get(&value) {
            return Interned(Arc::clone(existing));
        }
        let stored = Arc::new(value);
        self.table.insert(Arc::clone(&stored));
        Interned(stored)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Drop every resident value. Outstanding handles keep their allocations
    /// alive but will no longer deduplicate against future interns.
    pub fn reset(&mut self) {
        self.table.clear();
    }
}

impl<T: Eq + Hash> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}
