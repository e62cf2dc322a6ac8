// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Non-deterministic installation of pending rule updates.
//!
//! Each configured update is an `(install-at node, route)` pair. Whenever
//! the packet is about to collect next hops at a node with pending updates,
//! the process branches two ways: install the node's next update (mutating
//! the RIB and rebuilding the FIB for the current EC) or leave it pending.
//! The per-node install indices are interned so equal update progress
//! collapses in the state space.

use crate::fib::build_fib;
use crate::state::{ProcessKind, State};
use crate::{ModelCtx, ModelError};
use net::index::NodeIndex;
use std::collections::BTreeMap;
use tracing::info;
use topology::Route;

/// Per-node install progress: how many of the node's pending updates have
/// been installed along the current path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OpenflowUpdateState {
    installed: BTreeMap<NodeIndex, usize>,
}

impl OpenflowUpdateState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn installed(&self, node: NodeIndex) -> usize {
        self.installed.get(&node).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn with_installed(&self, node: NodeIndex) -> Self {
        let mut next = self.clone();
        *next.installed.entry(node).or_insert(0) += 1;
        next
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenflowProcess {
    updates: BTreeMap<NodeIndex, Vec<Route>>,
}

impl OpenflowProcess {
    #[must_use]
    pub fn new(updates: BTreeMap<NodeIndex, Vec<Route>>) -> Self {
        Self { updates }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.updates.values().flatten()
    }

    /// Pending updates at `node` in the given progress state.
    #[must_use]
    pub fn has_pending(&self, node: NodeIndex, state: &OpenflowUpdateState) -> bool {
        self.updates
            .get(&node)
            .is_some_and(|routes| state.installed(node) < routes.len())
    }

    #[must_use]
    fn next_update(&self, node: NodeIndex, state: &OpenflowUpdateState) -> Option<&Route> {
        self.updates
            .get(&node)
            .and_then(|routes| routes.get(state.installed(node)))
    }
}

/// One step of the install-or-skip branch at the current node.
/// `choice == 1` installs the next pending update; `choice == 0` proceeds
/// without installing.
pub fn exec_step(state: &mut State, ctx: &mut ModelCtx) -> Result<(), ModelError> {
    let node = state
        .pkt_location()
        .ok_or(ModelError::Inconsistent("no packet location"))?;

    if state.choice == 1 {
        let of_state = state.of_state().as_ref().clone();
        let route = ctx
            .openflow
            .next_update(node, &of_state)
            .ok_or(ModelError::Inconsistent("no pending update"))?
            .clone();
        info!("installing update at {}: {route}", ctx.network.node(node).name());
        ctx.network.node_mut(node).rib_mut().insert(route);

        let new_of_state = ctx
            .storage
            .of_update_states
            .intern(of_state.with_installed(node));
        state.set_of_state(new_of_state.clone());

        let fib = build_fib(&ctx.network, &ctx.ecs, &mut ctx.storage, state.dst_ip_ec());
        state.set_fib(fib);

        if ctx.openflow.has_pending(node, &new_of_state) {
            // another two-way branch for the node's next update
            state.choice_count = 2;
            return Ok(());
        }
    }

    state.process = ProcessKind::Forwarding;
    state.choice_count = 1;
    Ok(())
}
