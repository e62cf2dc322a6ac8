// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The in-worker depth-first search.
//!
//! Non-determinism is externalised as `(choice, choice_count)` in the state
//! vector: the explorer expands every `choice in [0, choice_count)` of a
//! state, runs one process step plus the invariant check, and pushes the
//! successor unless the path ended, a violation pruned it, or an equal
//! state (by interned identity) was already expanded.

use crate::invariants::{CheckOutcome, Invariant};
use crate::state::{ProcessKind, State};
use crate::{forwarding, openflow, scheduler, ModelCtx, ModelError};
use ahash::AHashSet;
use tracing::{debug, info};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Violated,
}

/// Run one process step of the state machine.
fn exec_step(state: &mut State, ctx: &mut ModelCtx) -> Result<(), ModelError> {
    match state.process {
        ProcessKind::ChooseConn => scheduler::exec_step(state),
        ProcessKind::Openflow => openflow::exec_step(state, ctx),
        ProcessKind::Forwarding => forwarding::exec_step(state, ctx),
    }
}

/// Exhaustively explore the current connection combination of `invariant`.
pub fn explore(invariant: &mut Invariant, ctx: &mut ModelCtx) -> Result<Verdict, ModelError> {
    let initial = invariant.make_initial_state(ctx)?;

    let mut visited: AHashSet<State> = AHashSet::new();
    let mut stack: Vec<State> = Vec::new();
    visited.insert(initial.clone());
    stack.push(initial);

    let mut expanded: u64 = 0;
    while let Some(state) = stack.pop() {
        for choice in 0..state.choice_count {
            let mut next = state.clone();
            next.choice = choice;
            exec_step(&mut next, ctx)?;
            expanded += 1;

            match invariant.check_violation(&mut next, ctx)? {
                CheckOutcome::ReinitDp => {
                    // next sub-invariant: fresh data plane, same search path
                    invariant.reinit(&mut next, ctx)?;
                }
                CheckOutcome::Null => {}
            }

            if next.violated {
                info!("*** invariant violated after {expanded} steps ***");
                return Ok(Verdict::Violated);
            }
            if next.choice_count == 0 {
                continue; // execution path ended and the property held
            }
            if visited.insert(next.clone()) {
                stack.push(next);
            }
        }
    }

    debug!("exploration finished: {expanded} steps, {} states", visited.len());
    Ok(Verdict::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::ConnSpec;
    use crate::invariants::{InvariantData, Reachability};
    use crate::openflow::OpenflowProcess;
    use net::ip::IpRange;
    use net::proto::Protocol;
    use topology::{Interface, Network, Node};

    /// Two directly connected L3 nodes: r0 (192.168.1.11/24) and r1
    /// (192.168.1.22/24).
    fn two_node_ctx() -> (ModelCtx, net::index::NodeIndex, net::index::NodeIndex) {
        let mut network = Network::new();
        let r0 = network.add_node(Node::new("r0", None)).unwrap();
        let r1 = network.add_node(Node::new("r1", None)).unwrap();
        let i0 = network
            .add_interface(r0, Interface::l3("eth0", "192.168.1.11/24".parse().unwrap()))
            .unwrap();
        let i1 = network
            .add_interface(r1, Interface::l3("eth0", "192.168.1.22/24".parse().unwrap()))
            .unwrap();
        network.add_link(r0, i0, r1, i1).unwrap();
        network.grow_l2_lans();

        let mut ctx = ModelCtx::new(network, OpenflowProcess::default(), 1);
        ctx.ecs
            .compute_initial_ecs(&ctx.network, std::iter::empty::<&topology::Route>());
        (ctx, r0, r1)
    }

    fn reachability_inv(
        ctx: &mut ModelCtx,
        src: net::index::NodeIndex,
        dst: &str,
        target: net::index::NodeIndex,
        reachable: bool,
    ) -> Invariant {
        let spec = ConnSpec {
            protocol: Protocol::Tcp,
            src_nodes: [src].into_iter().collect(),
            dst_ip: IpRange::host(dst.parse().unwrap()),
            src_port: None,
            dst_ports: [80].into_iter().collect(),
            owned_dst_only: false,
        };
        let mut inv = Invariant::Reachability(Reachability {
            data: InvariantData {
                conn_specs: vec![spec],
                ..Default::default()
            },
            target_nodes: [target].into_iter().collect(),
            reachable,
        });
        inv.compute_conn_matrix(&mut ctx.ecs);
        assert!(inv.set_conns());
        inv
    }

    #[test]
    fn two_node_reachability_verifies() {
        let (mut ctx, r0, r1) = two_node_ctx();
        let mut inv = reachability_inv(&mut ctx, r0, "192.168.1.22", r1, true);
        assert_eq!(inv.num_conn_ecs(), 1);
        let verdict = explore(&mut inv, &mut ctx).unwrap();
        assert_eq!(verdict, Verdict::Verified);
    }

    #[test]
    fn negated_reachability_is_violated_when_delivered() {
        let (mut ctx, r0, r1) = two_node_ctx();
        let mut inv = reachability_inv(&mut ctx, r0, "192.168.1.22", r1, false);
        let verdict = explore(&mut inv, &mut ctx).unwrap();
        assert_eq!(verdict, Verdict::Violated);
    }

    #[test]
    fn unreachable_destination_violates_positive_reachability() {
        let (mut ctx, r0, r1) = two_node_ctx();
        // destination outside both interface networks; its class exists only
        // because the connection itself adds one
        let mut inv = reachability_inv(&mut ctx, r0, "10.9.9.9", r1, true);
        let verdict = explore(&mut inv, &mut ctx).unwrap();
        assert_eq!(verdict, Verdict::Violated);
    }

    /// a has two equal-cost routes toward c's network, one via b1 and one
    /// via b2; both paths deliver.
    fn ecmp_ctx() -> (ModelCtx, net::index::NodeIndex, net::index::NodeIndex) {
        let mut network = Network::new();
        let a = network.add_node(Node::new("a", None)).unwrap();
        let b1 = network.add_node(Node::new("b1", None)).unwrap();
        let b2 = network.add_node(Node::new("b2", None)).unwrap();
        let c = network.add_node(Node::new("c", None)).unwrap();

        let a1 = network
            .add_interface(a, Interface::l3("eth1", "10.0.1.1/24".parse().unwrap()))
            .unwrap();
        let a2 = network
            .add_interface(a, Interface::l3("eth2", "10.0.2.1/24".parse().unwrap()))
            .unwrap();
        let b1a = network
            .add_interface(b1, Interface::l3("eth0", "10.0.1.2/24".parse().unwrap()))
            .unwrap();
        let b1c = network
            .add_interface(b1, Interface::l3("eth1", "10.0.3.1/24".parse().unwrap()))
            .unwrap();
        let b2a = network
            .add_interface(b2, Interface::l3("eth0", "10.0.2.2/24".parse().unwrap()))
            .unwrap();
        let b2c = network
            .add_interface(b2, Interface::l3("eth1", "10.0.4.1/24".parse().unwrap()))
            .unwrap();
        let c1 = network
            .add_interface(c, Interface::l3("eth0", "10.0.3.2/24".parse().unwrap()))
            .unwrap();
        let c2 = network
            .add_interface(c, Interface::l3("eth1", "10.0.4.2/24".parse().unwrap()))
            .unwrap();

        network.add_link(a, a1, b1, b1a).unwrap();
        network.add_link(a, a2, b2, b2a).unwrap();
        network.add_link(b1, b1c, c, c1).unwrap();
        network.add_link(b2, b2c, c, c2).unwrap();

        for nh in ["10.0.1.2", "10.0.2.2"] {
            network.node_mut(a).rib_mut().insert(topology::Route::new(
                "10.0.3.0/24".parse().unwrap(),
                Some(nh.parse().unwrap()),
                None,
                1,
            ));
        }
        network.node_mut(b2).rib_mut().insert(topology::Route::new(
            "10.0.3.0/24".parse().unwrap(),
            Some("10.0.4.2".parse().unwrap()),
            None,
            1,
        ));
        network.grow_l2_lans();

        let mut ctx = ModelCtx::new(network, OpenflowProcess::default(), 1);
        ctx.ecs
            .compute_initial_ecs(&ctx.network, std::iter::empty::<&topology::Route>());
        (ctx, a, c)
    }

    #[test]
    fn ecmp_branches_all_reach_the_target() {
        let (mut ctx, a, c) = ecmp_ctx();
        let mut inv = reachability_inv(&mut ctx, a, "10.0.3.2", c, true);
        let verdict = explore(&mut inv, &mut ctx).unwrap();
        assert_eq!(verdict, Verdict::Verified);
    }

    #[test]
    fn ecmp_is_loop_free() {
        let (mut ctx, a, _) = ecmp_ctx();
        let spec = ConnSpec {
            protocol: Protocol::Tcp,
            src_nodes: [a].into_iter().collect(),
            dst_ip: IpRange::host("10.0.3.2".parse().unwrap()),
            src_port: None,
            dst_ports: [80].into_iter().collect(),
            owned_dst_only: false,
        };
        let mut inv = Invariant::Loop(crate::invariants::LoopInv {
            data: InvariantData {
                conn_specs: vec![spec],
                ..Default::default()
            },
        });
        inv.compute_conn_matrix(&mut ctx.ecs);
        assert!(inv.set_conns());
        assert_eq!(explore(&mut inv, &mut ctx).unwrap(), Verdict::Verified);
    }

    /// c -- w -- s chain with static routing through w.
    fn chain_ctx() -> (
        ModelCtx,
        net::index::NodeIndex,
        net::index::NodeIndex,
        net::index::NodeIndex,
    ) {
        let mut network = Network::new();
        let c = network.add_node(Node::new("c", None)).unwrap();
        let w = network.add_node(Node::new("w", None)).unwrap();
        let s = network.add_node(Node::new("s", None)).unwrap();

        let ci = network
            .add_interface(c, Interface::l3("eth0", "10.0.1.1/24".parse().unwrap()))
            .unwrap();
        let w1 = network
            .add_interface(w, Interface::l3("eth0", "10.0.1.2/24".parse().unwrap()))
            .unwrap();
        let w2 = network
            .add_interface(w, Interface::l3("eth1", "10.0.2.1/24".parse().unwrap()))
            .unwrap();
        let si = network
            .add_interface(s, Interface::l3("eth0", "10.0.2.2/24".parse().unwrap()))
            .unwrap();
        network.add_link(c, ci, w, w1).unwrap();
        network.add_link(w, w2, s, si).unwrap();

        network.node_mut(c).rib_mut().insert(topology::Route::new(
            "10.0.2.0/24".parse().unwrap(),
            Some("10.0.1.2".parse().unwrap()),
            None,
            1,
        ));
        network.node_mut(s).rib_mut().insert(topology::Route::new(
            "10.0.1.0/24".parse().unwrap(),
            Some("10.0.2.1".parse().unwrap()),
            None,
            1,
        ));
        network.grow_l2_lans();

        let mut ctx = ModelCtx::new(network, OpenflowProcess::default(), 1);
        ctx.ecs
            .compute_initial_ecs(&ctx.network, std::iter::empty::<&topology::Route>());
        (ctx, c, w, s)
    }

    fn waypoint_inv(
        ctx: &mut ModelCtx,
        src: net::index::NodeIndex,
        dst: &str,
        target: net::index::NodeIndex,
        pass_through: bool,
    ) -> Invariant {
        let spec = ConnSpec {
            protocol: Protocol::Tcp,
            src_nodes: [src].into_iter().collect(),
            dst_ip: IpRange::host(dst.parse().unwrap()),
            src_port: None,
            dst_ports: [80].into_iter().collect(),
            owned_dst_only: false,
        };
        let mut inv = Invariant::Waypoint(crate::invariants::Waypoint {
            data: InvariantData {
                conn_specs: vec![spec],
                ..Default::default()
            },
            target_nodes: [target].into_iter().collect(),
            pass_through,
        });
        inv.compute_conn_matrix(&mut ctx.ecs);
        assert!(inv.set_conns());
        inv
    }

    #[test]
    fn traffic_through_the_chain_passes_the_waypoint() {
        let (mut ctx, c, w, _) = chain_ctx();
        let mut inv = waypoint_inv(&mut ctx, c, "10.0.2.2", w, true);
        assert_eq!(explore(&mut inv, &mut ctx).unwrap(), Verdict::Verified);
    }

    #[test]
    fn avoid_waypoint_on_the_only_path_is_violated() {
        let (mut ctx, c, w, _) = chain_ctx();
        let mut inv = waypoint_inv(&mut ctx, c, "10.0.2.2", w, false);
        assert_eq!(explore(&mut inv, &mut ctx).unwrap(), Verdict::Violated);
    }

    #[test]
    fn firewall_drop_with_cached_injection_confirms_negated_reachability() {
        use crate::DYNAMIC_PORT;
        use emulation::manager::HistKey;
        use emulation::result::{InjectionResult, InjectionResults};
        use net::hist::NodePacketHistory;
        use net::packet::Packet;
        use net::proto::ProtoState;
        use std::time::Duration;
        use topology::{ContainerConfig, DriverKind, MiddleboxDef};

        let mut network = Network::new();
        let c = network.add_node(Node::new("c", None)).unwrap();
        let fw_def = MiddleboxDef::new(
            DriverKind::Docker,
            ContainerConfig {
                image: "fw:latest".into(),
                working_dir: "/".into(),
                ..Default::default()
            },
            Duration::from_millis(10),
        );
        let fw = network.add_node(Node::new("fw", Some(fw_def))).unwrap();
        let s = network.add_node(Node::new("s", None)).unwrap();

        let ci = network
            .add_interface(c, Interface::l3("eth0", "10.0.0.5/24".parse().unwrap()))
            .unwrap();
        let fw_c = network
            .add_interface(fw, Interface::l3("eth0", "10.0.0.2/24".parse().unwrap()))
            .unwrap();
        let fw_s = network
            .add_interface(fw, Interface::l3("eth1", "192.168.2.1/24".parse().unwrap()))
            .unwrap();
        let si = network
            .add_interface(s, Interface::l3("eth0", "192.168.2.5/24".parse().unwrap()))
            .unwrap();
        network.add_link(c, ci, fw, fw_c).unwrap();
        network.add_link(fw, fw_s, s, si).unwrap();
        network.node_mut(c).rib_mut().insert(topology::Route::new(
            "192.168.2.0/24".parse().unwrap(),
            Some("10.0.0.2".parse().unwrap()),
            None,
            1,
        ));
        network.grow_l2_lans();

        let mut ctx = ModelCtx::new(network, OpenflowProcess::default(), 1);
        ctx.ecs
            .compute_initial_ecs(&ctx.network, std::iter::empty::<&topology::Route>());
        let mut inv = reachability_inv(&mut ctx, c, "192.168.2.5", s, false);

        // Seed the injection cache with the appliance's observed behavior:
        // the SYN to port 22 is explicitly dropped. The key is the history
        // holding exactly the packet the forwarding process will inject.
        let pkt = ctx.storage.packets.intern(Packet {
            ingress_intf: Some(fw_c),
            src_ip: "10.0.0.5".parse().unwrap(),
            dst_ip: "192.168.2.5".parse().unwrap(),
            src_port: DYNAMIC_PORT,
            dst_port: 80,
            seq: 0,
            ack: 0,
            proto_state: ProtoState::TcpInit1,
            payload: None,
        });
        let nph = ctx
            .storage
            .node_pkt_hists
            .intern(NodePacketHistory::new(pkt, None));
        let result = ctx
            .storage
            .injection_results
            .intern(InjectionResult::new(vec![], true));
        let mut set = InjectionResults::new();
        set.add(result);
        let set = ctx.storage.injection_result_sets.intern(set);
        ctx.inj_cache.insert(fw, HistKey(Some(nph)), set);

        assert_eq!(explore(&mut inv, &mut ctx).unwrap(), Verdict::Verified);
    }

    #[test]
    fn mutual_default_routes_form_a_loop() {
        let mut network = Network::new();
        let a = network.add_node(Node::new("a", None)).unwrap();
        let b = network.add_node(Node::new("b", None)).unwrap();
        let ia = network
            .add_interface(a, Interface::l3("eth0", "10.0.0.1/24".parse().unwrap()))
            .unwrap();
        let ib = network
            .add_interface(b, Interface::l3("eth0", "10.0.0.2/24".parse().unwrap()))
            .unwrap();
        network.add_link(a, ia, b, ib).unwrap();
        network.node_mut(a).rib_mut().insert(topology::Route::new(
            "9.9.9.9/32".parse().unwrap(),
            Some("10.0.0.2".parse().unwrap()),
            None,
            1,
        ));
        network.node_mut(b).rib_mut().insert(topology::Route::new(
            "9.9.9.9/32".parse().unwrap(),
            Some("10.0.0.1".parse().unwrap()),
            None,
            1,
        ));
        network.grow_l2_lans();

        let mut ctx = ModelCtx::new(network, OpenflowProcess::default(), 1);
        ctx.ecs
            .compute_initial_ecs(&ctx.network, std::iter::empty::<&topology::Route>());

        let spec = ConnSpec {
            protocol: Protocol::Tcp,
            src_nodes: [a].into_iter().collect(),
            dst_ip: IpRange::host("9.9.9.9".parse().unwrap()),
            src_port: None,
            dst_ports: [80].into_iter().collect(),
            owned_dst_only: false,
        };
        let mut inv = Invariant::Loop(crate::invariants::LoopInv {
            data: InvariantData {
                conn_specs: vec![spec],
                ..Default::default()
            },
        });
        inv.compute_conn_matrix(&mut ctx.ecs);
        assert!(inv.set_conns());
        assert_eq!(explore(&mut inv, &mut ctx).unwrap(), Verdict::Violated);
    }
}
