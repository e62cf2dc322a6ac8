// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::invariants::{CheckOutcome, InvariantData};
use crate::state::{FwdMode, State};
use crate::{ModelCtx, ModelError};
use net::index::NodeIndex;
use std::collections::BTreeSet;
use std::fmt::{self, Display};

/// Pass-through: every execution path must visit a target node before the
/// packet is accepted or dropped. Avoid: no execution path may visit one.
#[derive(Debug, Clone)]
pub struct Waypoint {
    pub data: InvariantData,
    pub target_nodes: BTreeSet<NodeIndex>,
    pub pass_through: bool,
}

impl Waypoint {
    pub fn check_violation(
        &self,
        state: &mut State,
        ctx: &mut ModelCtx,
    ) -> Result<CheckOutcome, ModelError> {
        let mode = state.fwd_mode();

        // an arrival at a waypoint node (the step that published the
        // node's candidates; the connection source does not count)
        if mode == FwdMode::ForwardPacket {
            if let Some(location) = state.pkt_location() {
                if self.target_nodes.contains(&location) {
                    if self.pass_through {
                        // remember the visit for the end-of-path check
                        let counts = state.reach_counts.increased(location);
                        state.reach_counts = ctx.storage.reach_counts.intern(counts);
                    } else {
                        state.violated = true;
                        state.choice_count = 0;
                    }
                }
            }
            return Ok(CheckOutcome::Null);
        }

        // end of the execution path: a pass-through waypoint must have been
        // visited by now
        let path_ended = (state.request_accepted() || mode == FwdMode::Dropped)
            && !state.other_executable_conns_exist();
        if self.pass_through && path_ended {
            state.violated = state.reach_counts.total() == 0;
            state.choice_count = 0;
        }
        Ok(CheckOutcome::Null)
    }
}

impl Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Waypoint ({}): {:?}",
            if self.pass_through { "O" } else { "X" },
            self.target_nodes
        )
    }
}
