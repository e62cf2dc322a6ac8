// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use crate::invariants::{CheckOutcome, Invariant};
use crate::state::State;
use crate::{ModelCtx, ModelError};
use std::fmt::{self, Display};

/// Ordered sub-invariants `[P, Q1, ..., Qn]`: the property holds if either
/// `P` is violated, or `P` holds and every `Qi` holds.
#[derive(Debug, Clone)]
pub struct Conditional {
    pub children: Vec<Invariant>,
    pub(crate) primed: bool,
}

impl Conditional {
    #[must_use]
    pub fn new(children: Vec<Invariant>) -> Self {
        Self {
            children,
            primed: false,
        }
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

        if idx == 0 {
            // the condition failing vacuously satisfies the property
            if state.violated {
                state.violated = false;
                return Ok(CheckOutcome::Null);
            }
        } else if state.violated {
            // a consequent failing violates the whole property
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

impl Display for Conditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Conditional of:")?;
        for child in &self.children {
            writeln!(f, "{child}")?;
        }
        Ok(())
    }
}
