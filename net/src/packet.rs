// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! A located abstract representative packet.

use crate::index::IntfIndex;
use crate::ip::Ipv4Address;
use crate::payload::Payload;
use crate::proto::ProtoState;
use std::fmt::{self, Display};
use storage::Interned;

/// One representative packet of the current equivalence class, annotated with
/// the interface it last entered (or, for packets read back from an
/// emulation, the interface it emerged from).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Packet {
    pub ingress_intf: Option<IntfIndex>,
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub proto_state: ProtoState,
    pub payload: Option<Interned<Payload>>,
}

impl Packet {
    /// A contentless packet used only to unblock a passive read on teardown.
    #[must_use]
    pub fn dummy(intf: IntfIndex) -> Self {
        Self {
            ingress_intf: Some(intf),
            src_ip: Ipv4Address::new(0),
            dst_ip: Ipv4Address::new(0),
            src_port: 0,
            dst_port: 0,
            seq: 0,
            ack: 0,
            proto_state: ProtoState::UdpReq,
            payload: None,
        }
    }

    /// Both packets belong to the same five-tuple, in either direction.
    #[must_use]
    pub fn same_conn(&self, other: &Packet) -> bool {
        self.same_flow(other) || self.reversed_flow(other)
    }

    #[must_use]
    pub fn same_flow(&self, other: &Packet) -> bool {
        self.src_ip == other.src_ip
            && self.dst_ip == other.dst_ip
            && self.src_port == other.src_port
            && self.dst_port == other.dst_port
    }

    #[must_use]
    pub fn reversed_flow(&self, other: &Packet) -> bool {
        self.src_ip == other.dst_ip
            && self.dst_ip == other.src_ip
            && self.src_port == other.dst_port
            && self.dst_port == other.src_port
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.len())
    }

    /// Sequence-number consumption of this packet: payload bytes, plus one
    /// virtual byte for SYN and FIN.
    #[must_use]
    pub fn seq_advance(&self) -> u32 {
        let ctl = u32::from(self.proto_state.has_syn() || self.proto_state.has_fin());
        self.payload_len() as u32 + ctl
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}:{} -> {}:{} (seq {}, ack {})",
            self.proto_state, self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.seq,
            self.ack
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(src: &str, sp: u16, dst: &str, dp: u16, ps: ProtoState) -> Packet {
        Packet {
            ingress_intf: None,
            src_ip: src.parse().unwrap(),
            dst_ip: dst.parse().unwrap(),
            src_port: sp,
            dst_port: dp,
            seq: 0,
            ack: 0,
            proto_state: ps,
            payload: None,
        }
    }

    #[test]
    fn flow_relations() {
        let req = pkt("10.0.0.1", 1234, "10.0.1.1", 80, ProtoState::TcpInit1);
        let rep = pkt("10.0.1.1", 80, "10.0.0.1", 1234, ProtoState::TcpInit2);
        let other = pkt("10.0.0.1", 1234, "10.0.1.1", 443, ProtoState::TcpInit1);

        assert!(req.reversed_flow(&rep));
        assert!(req.same_conn(&rep));
        assert!(req.same_flow(&req));
        assert!(!req.same_conn(&other));
    }

    #[test]
    fn seq_advance_counts_control_bits() {
        let syn = pkt("1.1.1.1", 1, "2.2.2.2", 2, ProtoState::TcpInit1);
        assert_eq!(syn.seq_advance(), 1);
        let ack = pkt("1.1.1.1", 1, "2.2.2.2", 2, ProtoState::TcpInit3);
        assert_eq!(ack.seq_advance(), 0);
    }
}
