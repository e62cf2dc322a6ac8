// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The symbolic forwarding process: advances the current connection's packet
//! hop by hop, branching over tied next hops and middlebox injection
//! outcomes, and drives the protocol phase machine on acceptance.

use crate::candidates::{Candidate, Candidates};
use crate::fib::build_fib;
use crate::payload::PayloadKey;
use crate::state::{FwdMode, ProcessKind, State};
use crate::visited::VisitedHops;
use crate::{ModelCtx, ModelError};
use emulation::manager::HistKey;
use emulation::result::{InjectionResult, InjectionResults};
use net::hist::NodePacketHistory;
use net::index::NodeIndex;
use net::packet::Packet;
use stats::Stats;
use storage::Interned;
use topology::IpNextHop;
use tracing::{debug, info};

/// One forwarding step, dispatched on the current connection's mode.
pub fn exec_step(state: &mut State, ctx: &mut ModelCtx) -> Result<(), ModelError> {
    match state.fwd_mode() {
        FwdMode::PacketEntry => packet_entry(state),
        FwdMode::FirstCollect => {
            collect_next_hops(state, ctx)?;
            if state.fwd_mode() == FwdMode::ForwardPacket {
                state.set_fwd_mode(FwdMode::FirstForward);
            }
            Ok(())
        }
        FwdMode::FirstForward => first_forward(state, ctx),
        FwdMode::CollectNhops => collect_next_hops(state, ctx),
        FwdMode::ForwardPacket => forward_packet(state, ctx),
        FwdMode::Accepted => accepted(state, ctx),
        FwdMode::Dropped => {
            state.choice_count = 0;
            Ok(())
        }
    }
}

/// Commit the phase sender as the packet's location.
fn packet_entry(state: &mut State) -> Result<(), ModelError> {
    let entry = state
        .tx_node()
        .ok_or(ModelError::Inconsistent("no sender committed"))?;
    state.set_pkt_location(Some(entry));
    state.set_ingress_intf(None);
    info!(
        "packet ({}) injected at {entry}",
        state.proto_state()
    );
    state.set_fwd_mode(FwdMode::FirstCollect);
    state.choice_count = 1;
    Ok(())
}

/// Learn the connection's source address from the chosen egress interface,
/// then forward.
fn first_forward(state: &mut State, ctx: &mut ModelCtx) -> Result<(), ModelError> {
    let cand = current_candidate(state)?;
    if let (l2_node, Some(l2_intf)) = (cand.nhop.l2_node, cand.nhop.l2_intf) {
        if let Some((_, egress_intf)) = ctx.network.node(l2_node).peer(l2_intf) {
            if let Some(addr) = ctx.network.intf(egress_intf).addr() {
                state.set_src_ip(addr);
            }
        }
    }
    forward_packet(state, ctx)
}

/// Resolve the candidate next hops at the current node: the FIB for a pure
/// model node, real injection for a middlebox. Previously committed choices
/// restrict the candidate set for path consistency.
fn collect_next_hops(state: &mut State, ctx: &mut ModelCtx) -> Result<(), ModelError> {
    let current = state
        .pkt_location()
        .ok_or(ModelError::Inconsistent("no packet location"))?;

    let mut candidates: Vec<Candidate> = if ctx.network.node(current).is_middlebox() {
        let results = inject_packet(state, ctx, current)?;
        injection_candidates(ctx, current, &results)
    } else {
        state
            .fib()
            .lookup(current)
            .iter()
            .map(|nh| Candidate::from_nhop(*nh))
            .collect()
    };

    // path consistency: a committed (EC, node) decision forces the same hop
    if let Some(committed) = state.path_choices().get(state.dst_ip_ec(), current) {
        let committed = *committed;
        candidates.retain(|c| c.nhop == committed);
    }

    if candidates.is_empty() {
        info!("packet dropped by {}", ctx.network.node(current).name());
        state.set_fwd_mode(FwdMode::Dropped);
        drop_connection(state);
        return Ok(());
    }

    update_candidates(state, ctx, candidates);
    state.set_fwd_mode(FwdMode::ForwardPacket);
    Ok(())
}

/// Move the packet to the chosen candidate, or accept on a terminal
/// self-loop.
fn forward_packet(state: &mut State, ctx: &mut ModelCtx) -> Result<(), ModelError> {
    let current = state
        .pkt_location()
        .ok_or(ModelError::Inconsistent("no packet location"))?;
    let cand = current_candidate(state)?;

    // commit this decision for later re-arrivals at (EC, node)
    let choices = state
        .path_choices()
        .with_choice(state.dst_ip_ec(), current, cand.nhop);
    state.set_path_choices(ctx.storage.choices.intern(choices));

    // a header-rewriting middlebox changes the connection's view
    if let Some(recv_pkt) = &cand.recv_pkt {
        adopt_rewritten_headers(state, ctx, recv_pkt)?;
    }

    let next = cand.nhop.l3_node;
    if next == current {
        info!("packet delivered at {}", ctx.network.node(next).name());
        state.set_rx_node(Some(next));
        state.set_fwd_mode(FwdMode::Accepted);
        state.choice_count = 1;
        return Ok(());
    }

    state.set_pkt_location(Some(next));
    state.set_ingress_intf(cand.nhop.l3_intf);
    info!("packet forwarded to {}", ctx.network.node(next).name());
    enter_collect(state, ctx, next);
    Ok(())
}

/// Transition into `COLLECT_NHOPS`, offering the openflow install branch
/// when the node has pending updates.
fn enter_collect(state: &mut State, ctx: &ModelCtx, node: NodeIndex) {
    state.set_fwd_mode(FwdMode::CollectNhops);
    if ctx.openflow.has_pending(node, state.of_state()) {
        state.process = ProcessKind::Openflow;
        state.choice_count = 2;
    } else {
        state.choice_count = 1;
    }
}

/// Protocol-phase transition on an accepted packet.
fn accepted(state: &mut State, ctx: &mut ModelCtx) -> Result<(), ModelError> {
    let ps = state.proto_state();
    if ps.is_last() {
        finish_connection(state);
        return Ok(());
    }
    let Some(next_ps) = ps.next() else {
        return Err(ModelError::Inconsistent("no successor phase"));
    };

    // sequence bookkeeping from the accepted packet
    let advance = accepted_seq_advance(state, ctx);
    let flip = ps.direction() != next_ps.direction();
    if flip {
        let old_seq = state.seq();
        let old_ack = state.ack();
        state.set_seq(old_ack);
        state.set_ack(old_seq.wrapping_add(advance));

        let old_src_port = state.src_port();
        state.set_src_port(state.dst_port());
        state.set_dst_port(old_src_port);

        // the reply's destination is the class of the original source
        let reply_ec = ctx.ecs.find_ec(state.src_ip())?;
        if reply_ec != state.dst_ip_ec() {
            state.set_dst_ip_ec(reply_ec);
            let fib = build_fib(&ctx.network, &ctx.ecs, &mut ctx.storage, reply_ec);
            state.set_fib(fib);
        }
        state.set_src_ip(net::ip::Ipv4Address::new(0)); // learned on the first hop

        // the responder becomes the sender of the next phase
        let responder = state
            .rx_node()
            .ok_or(ModelError::Inconsistent("accepted without receiver"))?;
        state.set_tx_node(Some(responder));
    } else {
        state.set_seq(state.seq().wrapping_add(advance));
    }

    state.set_proto_state(next_ps);
    state.set_fwd_mode(FwdMode::PacketEntry);
    state.set_ingress_intf(None);
    // loops are re-visits within one packet's journey; the next phase's
    // packet starts with a clean hop set
    state.visited_hops = ctx.storage.visited_hops.intern(VisitedHops::new());
    state.choice_count = 1;
    debug!("phase transition to {next_ps}");
    Ok(())
}

/// Sequence-number consumption of the phase that was just accepted.
fn accepted_seq_advance(state: &mut State, ctx: &mut ModelCtx) -> u32 {
    let ps = state.proto_state();
    let ctl = u32::from(ps.has_syn() || ps.has_fin());
    let payload_len = ctx
        .payloads
        .payload(
            &ctx.ecs,
            &mut ctx.storage.payloads,
            PayloadKey {
                dst_ip_ec: state.dst_ip_ec(),
                dst_port: state.dst_port(),
                proto_state: ps,
            },
        )
        .map_or(0, |p| p.len() as u32);
    payload_len + ctl
}

/// A fully finished connection stops being schedulable.
fn finish_connection(state: &mut State) {
    state.set_executable(false);
    to_choose_conn(state);
}

/// A dropped connection stops being schedulable; the search continues with
/// the remaining executable connections, if any.
fn drop_connection(state: &mut State) {
    state.set_executable(false);
    to_choose_conn(state);
}

/// Hand control to the scheduler, or end the execution path when nothing is
/// executable any more.
fn to_choose_conn(state: &mut State) {
    let executable = state.executable_count();
    if executable > 0 {
        state.process = ProcessKind::ChooseConn;
        state.choice_count = executable;
    } else {
        state.choice_count = 0;
    }
}

fn current_candidate(state: &State) -> Result<Candidate, ModelError> {
    let candidates = &state.candidates;
    if state.choice >= candidates.len() {
        return Err(ModelError::Inconsistent("choice out of range"));
    }
    Ok(candidates.at(state.choice).clone())
}

fn update_candidates(state: &mut State, ctx: &mut ModelCtx, candidates: Vec<Candidate>) {
    let interned = ctx.storage.candidates.intern(Candidates::new(candidates));
    state.choice_count = interned.len();
    state.candidates = interned;
}

/// Adopt the (possibly NAT-rewritten) header fields observed on the wire.
fn adopt_rewritten_headers(
    state: &mut State,
    ctx: &mut ModelCtx,
    recv_pkt: &Interned<Packet>,
) -> Result<(), ModelError> {
    state.set_src_ip(recv_pkt.src_ip);
    state.set_src_port(recv_pkt.src_port);
    state.set_dst_port(recv_pkt.dst_port);
    state.set_seq(recv_pkt.seq);
    state.set_ack(recv_pkt.ack);

    let ec = ctx.ecs.find_ec(recv_pkt.dst_ip)?;
    if ec != state.dst_ip_ec() {
        debug!("destination rewritten into {ec}");
        state.set_dst_ip_ec(ec);
        let fib = build_fib(&ctx.network, &ctx.ecs, &mut ctx.storage, ec);
        state.set_fib(fib);
    }
    Ok(())
}

/// Turn cached injection outcomes into forwarding candidates: every packet
/// that emerged maps to the peer across the interface it emerged from.
fn injection_candidates(
    ctx: &ModelCtx,
    mb: NodeIndex,
    results: &InjectionResults,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for result in results.iter() {
        for pkt in result.recv_pkts() {
            let Some(egress) = pkt.ingress_intf else {
                continue;
            };
            let Some((peer_node, peer_intf)) = ctx.network.node(mb).peer(egress) else {
                continue;
            };
            let (l3_node, l3_intf) = ctx
                .network
                .lan_of_intf(egress)
                .and_then(|lan| lan.find_l3_endpoint(pkt.dst_ip))
                .unwrap_or((peer_node, peer_intf));
            candidates.push(Candidate {
                nhop: IpNextHop {
                    l3_node,
                    l3_intf: Some(l3_intf),
                    l2_node: peer_node,
                    l2_intf: Some(peer_intf),
                },
                recv_pkt: Some(pkt.clone()),
            });
        }
    }
    candidates
}

/// Inject the current packet into the middlebox (or reuse the cached
/// outcome for this history) and return the resulting outcome set.
fn inject_packet(
    state: &mut State,
    ctx: &mut ModelCtx,
    mb: NodeIndex,
) -> Result<Interned<InjectionResults>, ModelError> {
    // the representative packet of the current step
    let payload = ctx.payloads.payload(
        &ctx.ecs,
        &mut ctx.storage.payloads,
        PayloadKey {
            dst_ip_ec: state.dst_ip_ec(),
            dst_port: state.dst_port(),
            proto_state: state.proto_state(),
        },
    );
    let pkt = Packet {
        ingress_intf: state.ingress_intf(),
        src_ip: state.src_ip(),
        dst_ip: ctx.ecs.ec(state.dst_ip_ec()).representative_addr(),
        src_port: state.src_port(),
        dst_port: state.dst_port(),
        seq: state.seq(),
        ack: state.ack(),
        proto_state: state.proto_state(),
        payload,
    };
    let pkt = ctx.storage.packets.intern(pkt);

    let prev_nph = state.pkt_hist().node_pkt_hist(mb).cloned();
    let new_nph = ctx
        .storage
        .node_pkt_hists
        .intern(NodePacketHistory::new(pkt.clone(), prev_nph.clone()));
    let cache_key = HistKey(Some(new_nph.clone()));

    let results = if let Some(cached) = ctx.inj_cache.get(mb, &cache_key) {
        debug!("injection cache hit for {mb}");
        cached.clone()
    } else {
        let timeout = ctx
            .network
            .node(mb)
            .middlebox()
            .map(|def| def.timeout)
            .unwrap_or_default()
            .max(ctx.drop_timeout.timeout());

        let emu_id = {
            let driver = ctx.make_driver(mb)?;
            let dropmon = ctx.dropmon.clone();
            ctx.emu_mgr.get_emulation(mb, &HistKey(prev_nph.clone()), move || {
                emulation::Emulation::init(mb, driver, dropmon)
            })?
        };
        let emu = ctx.emu_mgr.emu_mut(emu_id);
        emu.rewind(prev_nph.as_ref(), timeout)?;
        let (recv, explicit_drop) = emu.send_pkt(&pkt, timeout)?;
        ctx.emu_mgr
            .update_node_pkt_hist(emu_id, cache_key.clone());

        let last_latency = Stats::get().pkt_latencies().last().map(|(_, d)| *d);
        if let Some(lat) = last_latency {
            ctx.drop_timeout.update(lat, recv.len());
        }

        let recv: Vec<Interned<Packet>> = recv
            .into_iter()
            .map(|p| ctx.storage.packets.intern(p))
            .collect();
        let result = ctx
            .storage
            .injection_results
            .intern(InjectionResult::new(recv, explicit_drop));
        let mut set = InjectionResults::new();
        set.add(result);
        let set = ctx.storage.injection_result_sets.intern(set);
        ctx.inj_cache.insert(mb, cache_key, set.clone());
        set
    };

    // extend the histories with this injection
    let mut pkt_hist = state.pkt_hist().as_ref().clone();
    pkt_hist.set_node_pkt_hist(mb, Some(new_nph));
    let pkt_hist = ctx.storage.pkt_hists.intern(pkt_hist);
    state.set_pkt_hist(pkt_hist);

    Ok(results)
}
