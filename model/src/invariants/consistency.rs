// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::invariants::{CheckOutcome, Invariant};
use crate::state::State;
use crate::{ModelCtx, ModelError};
use std::fmt::{self, Display};
use tracing::info;

/// All sub-invariants must come out the same way: either every one is
/// violated or every one holds.
#[derive(Debug, Clone)]
pub struct Consistency {
    pub children: Vec<Invariant>,
    pub(crate) primed: bool,
    /// Verdict of the first completed sub-invariant; later ones must match.
    result: Option<bool>,
}

impl Consistency {
    #[must_use]
    pub fn new(children: Vec<Invariant>) -> Self {
        Self {
            children,
            primed: false,
            result: None,
        }
    }

    pub(crate) fn reset_result(&mut self) {
        self.result = None;
    }

    pub fn check_violation(
        &mut self,
        state: &mut State,
        ctx: &mut ModelCtx,
    ) -> Result<CheckOutcome, ModelError> {
        let idx = state.correlated_inv_idx;
        self.children[idx].check_violation(state, ctx)?;

        if state.choice_count != 0 {
            return Ok(CheckOutcome::Null);
        }
        info!(
            "sub-invariant {idx} {}",
            if state.violated { "violated" } else { "verified" }
        );

        let expected = *self.result.get_or_insert(state.violated);
        if state.violated != expected {
            state.violated = true;
            return Ok(CheckOutcome::Null);
        }

        if idx + 1 < self.children.len() {
            state.correlated_inv_idx = idx + 1;
            return Ok(CheckOutcome::ReinitDp);
        }
        state.violated = false;
        Ok(CheckOutcome::Null)
    }
}

impl Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Consistency of:")?;
        for child in &self.children {
            writeln!(f, "{child}")?;
        }
        Ok(())
    }
}
