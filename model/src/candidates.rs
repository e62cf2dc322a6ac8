// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The next-hop choice set published at the current step.

use net::packet::Packet;
use std::fmt::{self, Display};
use storage::Interned;
use topology::IpNextHop;

/// One branch of the current choice point. For candidates produced by
/// middlebox injection, the packet observed on the wire rides along so the
/// forwarding process can adopt its (possibly rewritten) header fields on
/// commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub nhop: IpNextHop,
    pub recv_pkt: Option<Interned<Packet>>,
}

impl Candidate {
    #[must_use]
    pub fn from_nhop(nhop: IpNextHop) -> Self {
        Self {
            nhop,
            recv_pkt: None,
        }
    }
}

/// Ordered vector of candidates; `choice` indexes into it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Candidates(Vec<Candidate>);

impl Candidates {
    #[must_use]
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self(candidates)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn at(&self, i: usize) -> &Candidate {
        &self.0[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.0.iter()
    }
}

impl Display for Candidates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for cand in &self.0 {
            write!(f, " {}", cand.nhop.l3_node)?;
        }
        write!(f, " ]")
    }
}
