// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::invariants::{CheckOutcome, InvariantData};
use crate::state::{FwdMode, State};
use crate::{ModelCtx, ModelError};
use std::fmt::{self, Display};

/// No execution may revisit a `(EC, dst_port, node)` hop. Thanks to choice
/// persistence, a revisit implies a genuine forwarding loop rather than a
/// different branch through the same node.
#[derive(Debug, Clone)]
pub struct LoopInv {
    pub data: InvariantData,
}

impl LoopInv {
    pub fn check_violation(
        &self,
        state: &mut State,
        ctx: &mut ModelCtx,
    ) -> Result<CheckOutcome, ModelError> {
        // One arrival publishes candidates exactly once, entering
        // FIRST_FORWARD (at the source) or FORWARD_PACKET (everywhere
        // else); that is when the hop is recorded.
        if !matches!(
            state.fwd_mode(),
            FwdMode::ForwardPacket | FwdMode::FirstForward
        ) {
            return Ok(CheckOutcome::Null);
        }
        let Some(location) = state.pkt_location() else {
            return Ok(CheckOutcome::Null);
        };

        let hop = (state.dst_ip_ec(), state.dst_port(), location);
        if state.visited_hops.visited(&hop) {
            state.violated = true;
            state.choice_count = 0;
        } else {
            let hops = state.visited_hops.with_hop(hop);
            state.visited_hops = ctx.storage.visited_hops.intern(hops);
        }
        Ok(CheckOutcome::Null)
    }
}

impl Display for LoopInv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Loop invariant")
    }
}
