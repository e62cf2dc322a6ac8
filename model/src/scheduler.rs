// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The connection scheduler: when several connections are executable, the
//! model checker branches over which one runs next.

use crate::state::{ProcessKind, State};
use crate::ModelError;
use tracing::debug;

/// Switch to the chosen executable connection and resume forwarding.
pub fn exec_step(state: &mut State) -> Result<(), ModelError> {
    let mut remaining = state.choice;
    for idx in 0..state.num_conns() {
        if state.conns[idx].executable {
            if remaining == 0 {
                state.conn = idx;
                debug!("scheduled connection {idx}");
                state.process = ProcessKind::Forwarding;
                state.choice_count = 1;
                return Ok(());
            }
            remaining -= 1;
        }
    }
    Err(ModelError::Inconsistent("no executable connection to choose"))
}
