// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::invariants::{CheckOutcome, InvariantData};
use crate::state::{FwdMode, State};
use crate::ModelError;
use net::index::NodeIndex;
use std::collections::BTreeSet;
use std::fmt::{self, Display};

/// The request must (or, negated, must not) be accepted by one of the
/// target nodes on every execution.
#[derive(Debug, Clone)]
pub struct Reachability {
    pub data: InvariantData,
    pub target_nodes: BTreeSet<NodeIndex>,
    pub reachable: bool,
}

impl Reachability {
    pub fn check_violation(&self, state: &mut State) -> Result<CheckOutcome, ModelError> {
        let reached = if state.request_accepted()
            && state
                .rx_node()
                .is_some_and(|rx| self.target_nodes.contains(&rx))
        {
            // accepted by one of the target nodes
            true
        } else if (state.request_accepted() || state.fwd_mode() == FwdMode::Dropped)
            && !state.other_executable_conns_exist()
        {
            // accepted by a non-target or dropped, with nothing else
            // executable left that could still deliver it
            false
        } else {
            // still in flight, or related connections may yet deliver it
            return Ok(CheckOutcome::Null);
        };

        state.violated = self.reachable != reached;
        state.choice_count = 0;
        Ok(CheckOutcome::Null)
    }
}

impl Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reachability ({}): {:?}",
            if self.reachable { "O" } else { "X" },
            self.target_nodes
        )
    }
}
