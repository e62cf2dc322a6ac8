// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The model-checker state vector and its typed accessors.
//!
//! All heap-shaped members are interned handles, so cloning a state copies a
//! few pointers and hashing it (for duplicate detection) hashes them by
//! identity. The accessors read and write the slot of the current
//! connection.

use crate::candidates::Candidates;
use crate::choices::Choices;
use crate::fib::Fib;
use crate::openflow::OpenflowUpdateState;
use crate::reachcounts::ReachCounts;
use crate::visited::VisitedHops;
use ec::EcIndex;
use net::hist::PacketHistory;
use net::index::{IntfIndex, NodeIndex};
use net::ip::Ipv4Address;
use net::proto::ProtoState;
use storage::Interned;

/// Forwarding automaton phase of one connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FwdMode {
    PacketEntry,
    FirstCollect,
    FirstForward,
    CollectNhops,
    ForwardPacket,
    Accepted,
    Dropped,
}

/// Which process consumes the next `(choice, choice_count)` pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    ChooseConn,
    Openflow,
    Forwarding,
}

/// Per-connection slots of the state vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnState {
    pub executable: bool,
    pub fwd_mode: FwdMode,
    pub proto_state: ProtoState,
    pub src_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub src_node: Option<NodeIndex>,
    pub tx_node: Option<NodeIndex>,
    pub rx_node: Option<NodeIndex>,
    pub pkt_location: Option<NodeIndex>,
    pub ingress_intf: Option<IntfIndex>,
    pub dst_ip_ec: EcIndex,
    pub fib: Interned<Fib>,
    pub pkt_hist: Interned<PacketHistory>,
    pub path_choices: Interned<Choices>,
    pub of_state: Interned<OpenflowUpdateState>,
    pub repetition: u32,
}

/// The full state vector: per-connection slots plus the scalar search
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct State {
    pub conns: Vec<ConnState>,
    pub conn: usize,
    pub correlated_inv_idx: usize,
    pub choice: usize,
    pub choice_count: usize,
    pub violated: bool,
    pub process: ProcessKind,
    pub candidates: Interned<Candidates>,
    pub reach_counts: Interned<ReachCounts>,
    pub visited_hops: Interned<VisitedHops>,
}

impl State {
    #[must_use]
    pub fn num_conns(&self) -> usize {
        self.conns.len()
    }

    #[must_use]
    pub fn cur(&self) -> &ConnState {
        &self.conns[self.conn]
    }

    pub fn cur_mut(&mut self) -> &mut ConnState {
        let conn = self.conn;
        &mut self.conns[conn]
    }

    // typed accessors over the current connection's slots

    #[must_use]
    pub fn executable(&self) -> bool {
        self.cur().executable
    }

    pub fn set_executable(&mut self, executable: bool) {
        self.cur_mut().executable = executable;
    }

    #[must_use]
    pub fn fwd_mode(&self) -> FwdMode {
        self.cur().fwd_mode
    }

    pub fn set_fwd_mode(&mut self, mode: FwdMode) {
        self.cur_mut().fwd_mode = mode;
    }

    #[must_use]
    pub fn proto_state(&self) -> ProtoState {
        self.cur().proto_state
    }

    pub fn set_proto_state(&mut self, ps: ProtoState) {
        self.cur_mut().proto_state = ps;
    }

    #[must_use]
    pub fn src_ip(&self) -> Ipv4Address {
        self.cur().src_ip
    }

    pub fn set_src_ip(&mut self, addr: Ipv4Address) {
        self.cur_mut().src_ip = addr;
    }

    #[must_use]
    pub fn src_port(&self) -> u16 {
        self.cur().src_port
    }

    pub fn set_src_port(&mut self, port: u16) {
        self.cur_mut().src_port = port;
    }

    #[must_use]
    pub fn dst_port(&self) -> u16 {
        self.cur().dst_port
    }

    pub fn set_dst_port(&mut self, port: u16) {
        self.cur_mut().dst_port = port;
    }

    #[must_use]
    pub fn seq(&self) -> u32 {
        self.cur().seq
    }

    pub fn set_seq(&mut self, seq: u32) {
        self.cur_mut().seq = seq;
    }

    #[must_use]
    pub fn ack(&self) -> u32 {
        self.cur().ack
    }

    pub fn set_ack(&mut self, ack: u32) {
        self.cur_mut().ack = ack;
    }

    #[must_use]
    pub fn src_node(&self) -> Option<NodeIndex> {
        self.cur().src_node
    }

    pub fn set_src_node(&mut self, node: Option<NodeIndex>) {
        self.cur_mut().src_node = node;
    }

    #[must_use]
    pub fn tx_node(&self) -> Option<NodeIndex> {
        self.cur().tx_node
    }

    pub fn set_tx_node(&mut self, node: Option<NodeIndex>) {
        self.cur_mut().tx_node = node;
    }

    #[must_use]
    pub fn rx_node(&self) -> Option<NodeIndex> {
        self.cur().rx_node
    }

    pub fn set_rx_node(&mut self, node: Option<NodeIndex>) {
        self.cur_mut().rx_node = node;
    }

    #[must_use]
    pub fn pkt_location(&self) -> Option<NodeIndex> {
        self.cur().pkt_location
    }

    pub fn set_pkt_location(&mut self, node: Option<NodeIndex>) {
        self.cur_mut().pkt_location = node;
    }

    #[must_use]
    pub fn ingress_intf(&self) -> Option<IntfIndex> {
        self.cur().ingress_intf
    }

    pub fn set_ingress_intf(&mut self, intf: Option<IntfIndex>) {
        self.cur_mut().ingress_intf = intf;
    }

    #[must_use]
    pub fn dst_ip_ec(&self) -> EcIndex {
        self.cur().dst_ip_ec
    }

    pub fn set_dst_ip_ec(&mut self, ec: EcIndex) {
        self.cur_mut().dst_ip_ec = ec;
    }

    #[must_use]
    pub fn fib(&self) -> &Interned<Fib> {
        &self.cur().fib
    }

    pub fn set_fib(&mut self, fib: Interned<Fib>) {
        self.cur_mut().fib = fib;
    }

    #[must_use]
    pub fn pkt_hist(&self) -> &Interned<PacketHistory> {
        &self.cur().pkt_hist
    }

    pub fn set_pkt_hist(&mut self, hist: Interned<PacketHistory>) {
        self.cur_mut().pkt_hist = hist;
    }

    #[must_use]
    pub fn path_choices(&self) -> &Interned<Choices> {
        &self.cur().path_choices
    }

    pub fn set_path_choices(&mut self, choices: Interned<Choices>) {
        self.cur_mut().path_choices = choices;
    }

    #[must_use]
    pub fn of_state(&self) -> &Interned<OpenflowUpdateState> {
        &self.cur().of_state
    }

    pub fn set_of_state(&mut self, of_state: Interned<OpenflowUpdateState>) {
        self.cur_mut().of_state = of_state;
    }

    #[must_use]
    pub fn repetition(&self) -> u32 {
        self.cur().repetition
    }

    pub fn set_repetition(&mut self, repetition: u32) {
        self.cur_mut().repetition = repetition;
    }

    // cross-connection helpers

    /// Any executable connection other than the current one.
    #[must_use]
    pub fn other_executable_conns_exist(&self) -> bool {
        self.conns
            .iter()
            .enumerate()
            .any(|(i, c)| i != self.conn && c.executable)
    }

    #[must_use]
    pub fn executable_count(&self) -> usize {
        self.conns.iter().filter(|c| c.executable).count()
    }

    /// The request of the current connection has been delivered: either the
    /// request packet was just accepted, or a later phase (its ACK or the
    /// reply) has already started travelling.
    #[must_use]
    pub fn request_accepted(&self) -> bool {
        use ProtoState::*;
        let ps = self.proto_state();
        (self.fwd_mode() == FwdMode::Accepted && ps.is_request())
            || (self.fwd_mode() == FwdMode::FirstForward
                && matches!(ps, TcpL7ReqA | TcpL7Rep | UdpRep | IcmpEchoRep))
    }
}
