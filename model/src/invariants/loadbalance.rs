// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::invariants::{CheckOutcome, InvariantData};
use crate::state::{FwdMode, ProcessKind, State};
use crate::{ModelCtx, ModelError};
use net::index::NodeIndex;
use std::collections::BTreeSet;
use std::fmt::{self, Display};
use tracing::debug;

/// The allocation of connections across the target nodes must keep its
/// variance-to-mean ratio within `max_dispersion_index`.
#[derive(Debug, Clone)]
pub struct LoadBalance {
    pub data: InvariantData,
    pub target_nodes: BTreeSet<NodeIndex>,
    pub max_dispersion_index: f64,
}

impl LoadBalance {
    pub fn check_violation(
        &self,
        state: &mut State,
        ctx: &mut ModelCtx,
    ) -> Result<CheckOutcome, ModelError> {
        // a connection counts where its opening packet lands
        if state.fwd_mode() != FwdMode::Accepted || !state.proto_state().is_first() {
            return Ok(CheckOutcome::Null);
        }
        let Some(rx) = state.rx_node() else {
            return Ok(CheckOutcome::Null);
        };

        let counts = state.reach_counts.increased(rx);
        state.reach_counts = ctx.storage.reach_counts.intern(counts);
        state.set_executable(false);

        let remaining = state.executable_count();
        if remaining == 0 {
            // the allocation is complete; judge its dispersion
            let index = state
                .reach_counts
                .dispersion_index(self.target_nodes.iter().copied());
            debug!("dispersion index: {index}");
            if index > self.max_dispersion_index {
                state.violated = true;
            }
            state.choice_count = 0;
        } else {
            state.process = ProcessKind::ChooseConn;
            state.choice_count = remaining;
        }
        Ok(CheckOutcome::Null)
    }
}

impl Display for LoadBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LoadBalance (max_dispersion_index: {}): {:?}",
            self.max_dispersion_index, self.target_nodes
        )
    }
}
