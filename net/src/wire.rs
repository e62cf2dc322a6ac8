// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Raw-Ethernet serialisation of representative packets for injection into
//! emulated middleboxes, and parsing of the frames read back.
//!
//! All injected frames use a fixed well-known source MAC so that frames
//! emerging from an appliance can be told apart from unrelated traffic. The
//! IPv4 identification and TTL, and the TCP window, are fixed so that
//! identical model packets always serialise to identical bytes.

use crate::NetError;
use crate::index::IntfIndex;
use crate::ip::Ipv4Address;
use crate::packet::Packet;
use crate::proto::{Direction, Protocol, ProtoState};
use bitflags::bitflags;
use etherparse::{IpHeaders, Ipv4Header, NetHeaders, PacketBuilder, PacketHeaders, TransportHeader};

/// Source MAC of every modelled interface; also identifies relevant frames on
/// the receive path.
pub const ID_ETH_ADDR: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

pub const WIRE_TTL: u8 = 64;
pub const WIRE_IPV4_ID: u16 = 242;
pub const WIRE_TCP_WINDOW: u16 = 65535;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const SYN = 0b0000_0001;
        const ACK = 0b0000_0010;
        const PSH = 0b0000_0100;
        const FIN = 0b0000_1000;
        const RST = 0b0001_0000;
    }
}

/// Concrete TCP control flags carried by each protocol phase.
#[must_use]
pub fn tcp_flags(state: ProtoState) -> TcpFlags {
    use ProtoState::*;
    match state {
        TcpInit1 => TcpFlags::SYN,
        TcpInit2 => TcpFlags::SYN | TcpFlags::ACK,
        TcpInit3 | TcpL7ReqA | TcpL7RepA | TcpTerm3 => TcpFlags::ACK,
        TcpL7Req | TcpL7Rep => TcpFlags::PSH | TcpFlags::ACK,
        TcpTerm1 | TcpTerm2 => TcpFlags::FIN | TcpFlags::ACK,
        UdpReq | UdpRep | IcmpEchoReq | IcmpEchoRep => TcpFlags::empty(),
    }
}

fn ipv4_header(pkt: &Packet, proto: etherparse::IpNumber) -> Result<Ipv4Header, NetError> {
    let mut ip = Ipv4Header::new(
        0, // lengths are fixed up by the builder on write
        WIRE_TTL,
        proto,
        pkt.src_ip.octets(),
        pkt.dst_ip.octets(),
    )
    .map_err(|e| NetError::WireBuild(e.to_string()))?;
    ip.identification = WIRE_IPV4_ID;
    Ok(ip)
}

/// Serialise a representative packet into a raw Ethernet frame.
pub fn serialize(pkt: &Packet, dst_mac: [u8; 6]) -> Result<Vec<u8>, NetError> {
    let payload: &[u8] = pkt.payload.as_ref().map_or(&[], |p| p.bytes());
    let eth = PacketBuilder::ethernet2(ID_ETH_ADDR, dst_mac);

    let mut out = Vec::new();
    match pkt.proto_state.protocol() {
        Protocol::Tcp => {
            let ip = ipv4_header(pkt, etherparse::IpNumber::TCP)?;
            let flags = tcp_flags(pkt.proto_state);
            let mut builder = eth
                .ip(IpHeaders::Ipv4(ip, Default::default()))
                .tcp(pkt.src_port, pkt.dst_port, pkt.seq, WIRE_TCP_WINDOW);
            if flags.contains(TcpFlags::SYN) {
                builder = builder.syn();
            }
            if flags.contains(TcpFlags::ACK) {
                builder = builder.ack(pkt.ack);
            }
            if flags.contains(TcpFlags::PSH) {
                builder = builder.psh();
            }
            if flags.contains(TcpFlags::FIN) {
                builder = builder.fin();
            }
            builder
                .write(&mut out, payload)
                .map_err(|e| NetError::WireBuild(e.to_string()))?;
        }
        Protocol::Udp => {
            let ip = ipv4_header(pkt, etherparse::IpNumber::UDP)?;
            eth.ip(IpHeaders::Ipv4(ip, Default::default()))
                .udp(pkt.src_port, pkt.dst_port)
                .write(&mut out, payload)
                .map_err(|e| NetError::WireBuild(e.to_string()))?;
        }
        Protocol::IcmpEcho => {
            let ip = ipv4_header(pkt, etherparse::IpNumber::ICMP)?;
            let step = eth.ip(IpHeaders::Ipv4(ip, Default::default()));
            let step = match pkt.proto_state.direction() {
                Direction::Request => step.icmpv4_echo_request(pkt.src_port, 0),
                Direction::Reply => step.icmpv4_echo_reply(pkt.src_port, 0),
            };
            step.write(&mut out, payload)
                .map_err(|e| NetError::WireBuild(e.to_string()))?;
        }
    }
    Ok(out)
}

/// Infer the protocol phase of a frame emerging from an appliance, relative
/// to the phase of the packet that was injected. Appliances normally emit the
/// phase they were given (possibly header-rewritten); the flags disambiguate
/// whenever they do not.
fn infer_proto_state(
    flags: TcpFlags,
    has_payload: bool,
    injected: ProtoState,
) -> ProtoState {
    use ProtoState::*;
    if flags == tcp_flags(injected) {
        return injected;
    }
    if flags.contains(TcpFlags::SYN) {
        return if flags.contains(TcpFlags::ACK) {
            TcpInit2
        } else {
            TcpInit1
        };
    }
    if flags.contains(TcpFlags::FIN) {
        return if injected == TcpTerm1 { TcpTerm2 } else { TcpTerm1 };
    }
    if has_payload {
        return if injected >= TcpL7Rep { TcpL7Rep } else { TcpL7Req };
    }
    // bare ACK: keep the nearest ACK phase at or after the injected one
    match injected {
        TcpInit1 | TcpInit2 | TcpInit3 => TcpInit3,
        TcpL7Req | TcpL7ReqA => TcpL7ReqA,
        TcpL7Rep | TcpL7RepA => TcpL7RepA,
        _ => TcpTerm3,
    }
}

/// Parse a frame read from an emulation into a representative packet.
///
/// Returns `Ok(None)` for frames that are not part of the model's traffic
/// (wrong MAC, non-IPv4, unsupported transport). `egress_intf` is the model
/// interface the frame was captured on; `injected` provides the phase context
/// for flag disambiguation.
pub fn parse(
    frame: &[u8],
    egress_intf: IntfIndex,
    injected: &Packet,
) -> Result<Option<Packet>, NetError> {
    let headers = match PacketHeaders::from_ethernet_slice(frame) {
        Ok(h) => h,
        Err(_) => return Ok(None), // not a frame we understand; ignore
    };

    // Only frames carrying the model's source MAC are relevant.
    match &headers.link {
        Some(etherparse::LinkHeader::Ethernet2(eth)) if eth.source == ID_ETH_ADDR => {}
        _ => return Ok(None),
    }

    let Some(NetHeaders::Ipv4(ip, _)) = &headers.net else {
        return Ok(None);
    };
    let src_ip = Ipv4Address::from(ip.source);
    let dst_ip = Ipv4Address::from(ip.destination);
    let payload = headers.payload.slice();

    let pkt = match &headers.transport {
        Some(TransportHeader::Tcp(tcp)) => {
            let mut flags = TcpFlags::empty();
            if tcp.syn {
                flags |= TcpFlags::SYN;
            }
            if tcp.ack {
                flags |= TcpFlags::ACK;
            }
            if tcp.psh {
                flags |= TcpFlags::PSH;
            }
            if tcp.fin {
                flags |= TcpFlags::FIN;
            }
            if tcp.rst {
                flags |= TcpFlags::RST;
            }
            Packet {
                ingress_intf: Some(egress_intf),
                src_ip,
                dst_ip,
                src_port: tcp.source_port,
                dst_port: tcp.destination_port,
                seq: tcp.sequence_number,
                ack: tcp.acknowledgment_number,
                proto_state: infer_proto_state(flags, !payload.is_empty(), injected.proto_state),
                payload: None, // payload re-attachment happens in the model
            }
        }
        Some(TransportHeader::Udp(udp)) => Packet {
            ingress_intf: Some(egress_intf),
            src_ip,
            dst_ip,
            src_port: udp.source_port,
            dst_port: udp.destination_port,
            seq: 0,
            ack: 0,
            proto_state: if injected.proto_state == ProtoState::UdpReq
                && dst_ip == injected.src_ip
            {
                ProtoState::UdpRep
            } else {
                injected.proto_state
            },
            payload: None,
        },
        Some(TransportHeader::Icmpv4(icmp)) => {
            use etherparse::Icmpv4Type;
            let (proto_state, id) = match icmp.icmp_type {
                Icmpv4Type::EchoRequest(hdr) => (ProtoState::IcmpEchoReq, hdr.id),
                Icmpv4Type::EchoReply(hdr) => (ProtoState::IcmpEchoRep, hdr.id),
                _ => return Ok(None),
            };
            Packet {
                ingress_intf: Some(egress_intf),
                src_ip,
                dst_ip,
                src_port: id,
                dst_port: 0,
                seq: 0,
                ack: 0,
                proto_state,
                payload: None,
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(pkt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_pkt(state: ProtoState) -> Packet {
        Packet {
            ingress_intf: None,
            src_ip: "10.0.0.5".parse().unwrap(),
            dst_ip: "192.168.2.5".parse().unwrap(),
            src_port: 49152,
            dst_port: 80,
            seq: 1000,
            ack: 2000,
            proto_state: state,
            payload: None,
        }
    }

    #[test]
    fn phase_flags_match_the_wire_contract() {
        assert_eq!(tcp_flags(ProtoState::TcpInit1), TcpFlags::SYN);
        assert_eq!(tcp_flags(ProtoState::TcpInit2), TcpFlags::SYN | TcpFlags::ACK);
        assert_eq!(tcp_flags(ProtoState::TcpInit3), TcpFlags::ACK);
        assert_eq!(tcp_flags(ProtoState::TcpL7Req), TcpFlags::PSH | TcpFlags::ACK);
        assert_eq!(tcp_flags(ProtoState::TcpTerm1), TcpFlags::FIN | TcpFlags::ACK);
        assert_eq!(tcp_flags(ProtoState::TcpTerm3), TcpFlags::ACK);
    }

    #[test]
    fn tcp_round_trip_preserves_headers() {
        let sent = model_pkt(ProtoState::TcpInit1);
        let frame = serialize(&sent, [1, 2, 3, 4, 5, 6]).unwrap();
        let got = parse(&frame, IntfIndex::new(0), &sent).unwrap().unwrap();

        assert_eq!(got.src_ip, sent.src_ip);
        assert_eq!(got.dst_ip, sent.dst_ip);
        assert_eq!(got.src_port, sent.src_port);
        assert_eq!(got.dst_port, sent.dst_port);
        assert_eq!(got.seq, sent.seq);
        assert_eq!(got.proto_state, ProtoState::TcpInit1);
    }

    #[test]
    fn synack_is_recognised_as_the_second_handshake_step() {
        let sent = model_pkt(ProtoState::TcpInit1);
        let mut reply = model_pkt(ProtoState::TcpInit2);
        std::mem::swap(&mut reply.src_ip, &mut reply.dst_ip);
        std::mem::swap(&mut reply.src_port, &mut reply.dst_port);

        let frame = serialize(&reply, [1, 2, 3, 4, 5, 6]).unwrap();
        let got = parse(&frame, IntfIndex::new(1), &sent).unwrap().unwrap();
        assert_eq!(got.proto_state, ProtoState::TcpInit2);
    }

    #[test]
    fn foreign_frames_are_ignored() {
        let sent = model_pkt(ProtoState::TcpInit1);
        let mut frame = serialize(&sent, [1, 2, 3, 4, 5, 6]).unwrap();
        // clobber the source MAC
        frame[6] = 0x00;
        assert!(parse(&frame, IntfIndex::new(0), &sent).unwrap().is_none());
    }

    #[test]
    fn icmp_round_trip() {
        let sent = Packet {
            src_port: 7,
            dst_port: 0,
            ..model_pkt(ProtoState::IcmpEchoReq)
        };
        let frame = serialize(&sent, [9, 9, 9, 9, 9, 9]).unwrap();
        let got = parse(&frame, IntfIndex::new(2), &sent).unwrap().unwrap();
        assert_eq!(got.proto_state, ProtoState::IcmpEchoReq);
        assert_eq!(got.src_port, 7);
    }
}
