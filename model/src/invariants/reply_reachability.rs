// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::invariants::{CheckOutcome, InvariantData};
use crate::state::{FwdMode, State};
use crate::ModelError;
use net::index::NodeIndex;
use net::proto::{Protocol, ProtoState};
use std::collections::BTreeSet;
use std::fmt::{self, Display};

/// Reachability plus: the reply, routed back, must reach the original
/// sender.
#[derive(Debug, Clone)]
pub struct ReplyReachability {
    pub data: InvariantData,
    pub target_nodes: BTreeSet<NodeIndex>,
    pub reachable: bool,
}

/// Whether the phase is still part of the request journey (session
/// construction included).
fn in_request_journey(ps: ProtoState) -> bool {
    match ps.protocol() {
        Protocol::Tcp => ps < ProtoState::TcpL7Rep,
        Protocol::Udp => ps < ProtoState::UdpRep,
        Protocol::IcmpEcho => ps < ProtoState::IcmpEchoRep,
    }
}

impl ReplyReachability {
    pub fn check_violation(&self, state: &mut State) -> Result<CheckOutcome, ModelError> {
        let ps = state.proto_state();

        if in_request_journey(ps) {
            let misdelivered = state.request_accepted()
                && !state
                    .rx_node()
                    .is_some_and(|rx| self.target_nodes.contains(&rx));
            if (misdelivered || state.fwd_mode() == FwdMode::Dropped)
                && !state.other_executable_conns_exist()
            {
                // the request journey failed outright
                state.violated = self.reachable;
                state.choice_count = 0;
            }
            return Ok(CheckOutcome::Null);
        }

        if ps.is_reply_dir() || ps.is_reply() {
            let reached = if state.fwd_mode() == FwdMode::Accepted
                && state.rx_node() == state.src_node()
            {
                true
            } else if (state.fwd_mode() == FwdMode::Accepted || state.fwd_mode() == FwdMode::Dropped)
                && !state.other_executable_conns_exist()
            {
                false
            } else {
                return Ok(CheckOutcome::Null);
            };
            state.violated = self.reachable != reached;
            state.choice_count = 0;
        }
        Ok(CheckOutcome::Null)
    }
}

impl Display for ReplyReachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReplyReachability ({}): {:?}",
            if self.reachable { "O" } else { "X" },
            self.target_nodes
        )
    }
}
