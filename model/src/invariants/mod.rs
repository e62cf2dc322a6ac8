// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The invariant engine.
//!
//! Leaf invariants decide one temporal property over forwarding executions;
//! the conditional and consistency composites sequence sub-invariants, each
//! of which completes a full exploration before the next begins (driven by
//! the [`CheckOutcome::ReinitDp`] sentinel).

mod conditional;
mod consistency;
mod loadbalance;
mod loop_inv;
mod one_request;
mod reachability;
mod reply_reachability;
mod waypoint;

pub use conditional::Conditional;
pub use consistency::Consistency;
pub use loadbalance::LoadBalance;
pub use loop_inv::LoopInv;
pub use one_request::OneRequest;
pub use reachability::Reachability;
pub use reply_reachability::ReplyReachability;
pub use waypoint::Waypoint;

use crate::candidates::Candidates;
use crate::conn::{ConnSpec, Connection, ConnectionMatrix};
use crate::reachcounts::ReachCounts;
use crate::state::{ProcessKind, State};
use crate::visited::VisitedHops;
use crate::{ModelCtx, ModelError};
use ec::EqClassMgr;
use std::fmt::{self, Display};

/// Result of a violation check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Keep exploring.
    Null,
    /// The driver must reset the data-plane state for the next
    /// sub-invariant.
    ReinitDp,
}

/// Connection plumbing shared by every invariant.
#[derive(Debug, Clone, Default)]
pub struct InvariantData {
    pub conn_specs: Vec<ConnSpec>,
    pub matrix: ConnectionMatrix,
    pub conns: Vec<Connection>,
}

impl InvariantData {
    pub fn compute_conn_matrix(&mut self, ecs: &mut EqClassMgr) {
        for spec in &self.conn_specs {
            spec.update_inv_ecs(ecs);
        }
        self.matrix.clear();
        for spec in &self.conn_specs {
            self.matrix.add(spec.compute_connections(ecs));
        }
    }

    /// Advance to the next connection tuple; false when exhausted.
    pub fn set_conns(&mut self) -> bool {
        self.conns = self.matrix.get_next_conns();
        !self.conns.is_empty()
    }

    /// A fresh state vector for the current connection tuple.
    pub fn initial_state(&self, ctx: &mut ModelCtx) -> Result<State, ModelError> {
        let conns = self
            .conns
            .iter()
            .map(|c| c.initial_conn_state(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        let executable = conns.len();
        Ok(State {
            conns,
            conn: 0,
            correlated_inv_idx: 0,
            choice: 0,
            choice_count: executable,
            violated: false,
            process: ProcessKind::ChooseConn,
            candidates: ctx.storage.candidates.intern(Candidates::default()),
            reach_counts: ctx.storage.reach_counts.intern(ReachCounts::new()),
            visited_hops: ctx.storage.visited_hops.intern(VisitedHops::new()),
        })
    }
}

/// Tagged family of invariants.
#[derive(Debug, Clone)]
pub enum Invariant {
    Reachability(Reachability),
    ReplyReachability(ReplyReachability),
    Waypoint(Waypoint),
    Loop(LoopInv),
    OneRequest(OneRequest),
    LoadBalance(LoadBalance),
    Conditional(Conditional),
    Consistency(Consistency),
}

impl Invariant {
    /// Number of (connection x EC) combinations this invariant enumerates.
    #[must_use]
    pub fn num_conn_ecs(&self) -> usize {
        match self {
            Invariant::Conditional(inv) => inv
                .children
                .iter()
                .map(Invariant::num_conn_ecs)
                .product(),
            Invariant::Consistency(inv) => inv
                .children
                .iter()
                .map(Invariant::num_conn_ecs)
                .product(),
            _ => self.data().matrix.num_conns(),
        }
    }

    pub fn compute_conn_matrix(&mut self, ecs: &mut EqClassMgr) {
        match self {
            Invariant::Conditional(inv) => {
                for child in &mut inv.children {
                    child.compute_conn_matrix(ecs);
                }
            }
            Invariant::Consistency(inv) => {
                for child in &mut inv.children {
                    child.compute_conn_matrix(ecs);
                }
            }
            _ => self.data_mut().compute_conn_matrix(ecs),
        }
    }

    /// Advance to the next connection combination. For composites this is
    /// an odometer over the children.
    pub fn set_conns(&mut self) -> bool {
        match self {
            Invariant::Conditional(inv) => set_conns_odometer(&mut inv.children, &mut inv.primed),
            Invariant::Consistency(inv) => set_conns_odometer(&mut inv.children, &mut inv.primed),
            _ => self.data_mut().set_conns(),
        }
    }

    /// A fresh state vector for the current combination, with the
    /// invariant's own fields reset.
    pub fn make_initial_state(&mut self, ctx: &mut ModelCtx) -> Result<State, ModelError> {
        match self {
            Invariant::Conditional(inv) => {
                let mut state = inv.children[0].make_initial_state(ctx)?;
                state.correlated_inv_idx = 0;
                Ok(state)
            }
            Invariant::Consistency(inv) => {
                inv.reset_result();
                let mut state = inv.children[0].make_initial_state(ctx)?;
                state.correlated_inv_idx = 0;
                Ok(state)
            }
            _ => self.data().initial_state(ctx),
        }
    }

    /// Re-initialise the data plane mid-exploration for the current
    /// sub-invariant, keeping the verdict fields intact.
    pub fn reinit(&mut self, state: &mut State, ctx: &mut ModelCtx) -> Result<(), ModelError> {
        let idx = state.correlated_inv_idx;
        let child = match self {
            Invariant::Conditional(inv) => &mut inv.children[idx],
            Invariant::Consistency(inv) => &mut inv.children[idx],
            _ => self,
        };
        let fresh = child.make_initial_state(ctx)?;
        state.conns = fresh.conns;
        state.conn = 0;
        state.process = ProcessKind::ChooseConn;
        state.choice_count = state.executable_count();
        state.candidates = fresh.candidates;
        state.reach_counts = fresh.reach_counts;
        state.visited_hops = fresh.visited_hops;
        Ok(())
    }

    /// Check the property after a forwarding step; may set `violated` and
    /// prune the search.
    pub fn check_violation(
        &mut self,
        state: &mut State,
        ctx: &mut ModelCtx,
    ) -> Result<CheckOutcome, ModelError> {
        match self {
            Invariant::Reachability(inv) => inv.check_violation(state),
            Invariant::ReplyReachability(inv) => inv.check_violation(state),
            Invariant::Waypoint(inv) => inv.check_violation(state, ctx),
            Invariant::Loop(inv) => inv.check_violation(state, ctx),
            Invariant::OneRequest(inv) => inv.check_violation(state, ctx),
            Invariant::LoadBalance(inv) => inv.check_violation(state, ctx),
            Invariant::Conditional(inv) => inv.check_violation(state, ctx),
            Invariant::Consistency(inv) => inv.check_violation(state, ctx),
        }
    }

    fn data(&self) -> &InvariantData {
        match self {
            Invariant::Reachability(inv) => &inv.data,
            Invariant::ReplyReachability(inv) => &inv.data,
            Invariant::Waypoint(inv) => &inv.data,
            Invariant::Loop(inv) => &inv.data,
            Invariant::OneRequest(inv) => &inv.data,
            Invariant::LoadBalance(inv) => &inv.data,
            Invariant::Conditional(_) | Invariant::Consistency(_) => {
                unreachable!("composites have no own connection data")
            }
        }
    }

    fn data_mut(&mut self) -> &mut InvariantData {
        match self {
            Invariant::Reachability(inv) => &mut inv.data,
            Invariant::ReplyReachability(inv) => &mut inv.data,
            Invariant::Waypoint(inv) => &mut inv.data,
            Invariant::Loop(inv) => &mut inv.data,
            Invariant::OneRequest(inv) => &mut inv.data,
            Invariant::LoadBalance(inv) => &mut inv.data,
            Invariant::Conditional(_) | Invariant::Consistency(_) => {
                unreachable!("composites have no own connection data")
            }
        }
    }
}

/// Odometer over child invariants: advance the first child; on exhaustion
/// reset it to its first tuple and carry into the next child.
fn set_conns_odometer(children: &mut [Invariant], primed: &mut bool) -> bool {
    if !*primed {
        for child in children.iter_mut() {
            if !child.set_conns() {
                return false;
            }
        }
        *primed = true;
        return true;
    }
    for child in children.iter_mut() {
        if child.set_conns() {
            return true;
        }
        child.reset_matrix();
        let _ = child.set_conns();
    }
    false
}

impl Invariant {
    fn reset_matrix(&mut self) {
        match self {
            Invariant::Conditional(inv) => {
                for child in &mut inv.children {
                    child.reset_matrix();
                }
                inv.primed = false;
            }
            Invariant::Consistency(inv) => {
                for child in &mut inv.children {
                    child.reset_matrix();
                }
                inv.primed = false;
            }
            _ => self.data_mut().matrix.reset(),
        }
    }
}

impl Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invariant::Reachability(inv) => inv.fmt(f),
            Invariant::ReplyReachability(inv) => inv.fmt(f),
            Invariant::Waypoint(inv) => inv.fmt(f),
            Invariant::Loop(inv) => inv.fmt(f),
            Invariant::OneRequest(inv) => inv.fmt(f),
            Invariant::LoadBalance(inv) => inv.fmt(f),
            Invariant::Conditional(inv) => inv.fmt(f),
            Invariant::Consistency(inv) => inv.fmt(f),
        }
    }
}
