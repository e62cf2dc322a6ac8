// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Concrete L7 payload bytes carried by representative packets.
//!
//! Payloads are templates, not symbols: identical `(EC, port, phase)` keys
//! always yield identical bytes, so the payload manager (in the model crate)
//! interns them and packets carry handles.

use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Payload {
    data: Vec<u8>,
}

impl Payload {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self {
            data: s.as_bytes().to_vec(),
        }
    }
}

impl Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload[{} bytes]", self.data.len())
    }
}
