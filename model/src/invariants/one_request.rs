// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::invariants::{CheckOutcome, InvariantData};
use crate::state::{FwdMode, State};
use crate::{ModelCtx, ModelError};
use net::index::NodeIndex;
use std::collections::BTreeSet;
use std::fmt::{self, Display};

/// At most one target node ever sees the request, across all concurrent
/// connections.
#[derive(Debug, Clone)]
pub struct OneRequest {
    pub data: InvariantData,
    pub target_nodes: BTreeSet<NodeIndex>,
}

impl OneRequest {
    pub fn check_violation(
        &self,
        state: &mut State,
        ctx: &mut ModelCtx,
    ) -> Result<CheckOutcome, ModelError> {
        if state.fwd_mode() != FwdMode::Accepted || !state.proto_state().is_request() {
            return Ok(CheckOutcome::Null);
        }
        let Some(rx) = state.rx_node() else {
            return Ok(CheckOutcome::Null);
        };
        if !self.target_nodes.contains(&rx) {
            return Ok(CheckOutcome::Null);
        }

        let counts = state.reach_counts.increased(rx);
        if counts.total() > 1 {
            state.violated = true;
            state.choice_count = 0;
        }
        state.reach_counts = ctx.storage.reach_counts.intern(counts);

        // the delivered connection is done; hand over to the rest
        state.set_executable(false);
        if !state.violated {
            let executable = state.executable_count();
            if executable > 0 {
                state.process = crate::state::ProcessKind::ChooseConn;
                state.choice_count = executable;
            } else {
                state.choice_count = 0;
            }
        }
        Ok(CheckOutcome::Null)
    }
}

impl Display for OneRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OneRequest: {:?}", self.target_nodes)
    }
}
