// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The per-connection protocol automaton.
//!
//! Fourteen states cover a full TCP session (three-way handshake, one L7
//! request/reply exchange, four-way termination with the middle two steps
//! merged), a UDP request/reply pair, and an ICMP echo exchange. The state
//! number encodes the phase order: within one family, the successor is always
//! the next discriminant.

use std::fmt::{self, Display};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    IcmpEcho,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::IcmpEcho => write!(f, "ICMP"),
        }
    }
}

/// Which endpoint of the connection emits a packet in a given state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Reply,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ProtoState {
    TcpInit1 = 1, // TCP 3-way handshake SYN
    TcpInit2,     // TCP 3-way handshake SYN/ACK
    TcpInit3,     // TCP 3-way handshake ACK
    TcpL7Req,     // L7 request
    TcpL7ReqA,    // L7 request ACK
    TcpL7Rep,     // L7 reply
    TcpL7RepA,    // L7 reply ACK
    TcpTerm1,     // TCP termination FIN/ACK
    TcpTerm2,     // TCP termination FIN/ACK
    TcpTerm3,     // TCP termination ACK
    UdpReq,       // UDP request
    UdpRep,       // UDP reply
    IcmpEchoReq,  // ICMP echo request
    IcmpEchoRep,  // ICMP echo reply
}

impl ProtoState {
    #[must_use]
    pub fn protocol(self) -> Protocol {
        use ProtoState::*;
        match self {
            TcpInit1 | TcpInit2 | TcpInit3 | TcpL7Req | TcpL7ReqA | TcpL7Rep | TcpL7RepA
            | TcpTerm1 | TcpTerm2 | TcpTerm3 => Protocol::Tcp,
            UdpReq | UdpRep => Protocol::Udp,
            IcmpEchoReq | IcmpEchoRep => Protocol::IcmpEcho,
        }
    }

    /// Which side of the connection sends a packet in this state. The
    /// termination handshake is initiated by the original requester.
    #[must_use]
    pub fn direction(self) -> Direction {
        use ProtoState::*;
        match self {
            TcpInit1 | TcpInit3 | TcpL7Req | TcpL7RepA | TcpTerm1 | TcpTerm3 | UdpReq
            | IcmpEchoReq => Direction::Request,
            TcpInit2 | TcpL7ReqA | TcpL7Rep | TcpTerm2 | UdpRep | IcmpEchoRep => Direction::Reply,
        }
    }

    #[must_use]
    pub fn is_request_dir(self) -> bool {
        self.direction() == Direction::Request
    }

    #[must_use]
    pub fn is_reply_dir(self) -> bool {
        self.direction() == Direction::Reply
    }

    /// The actual application request of the exchange.
    #[must_use]
    pub fn is_request(self) -> bool {
        matches!(
            self,
            ProtoState::TcpL7Req | ProtoState::UdpReq | ProtoState::IcmpEchoReq
        )
    }

    /// The actual application reply of the exchange.
    #[must_use]
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            ProtoState::TcpL7Rep | ProtoState::UdpRep | ProtoState::IcmpEchoRep
        )
    }

    /// First state of its protocol family.
    #[must_use]
    pub fn is_first(self) -> bool {
        matches!(
            self,
            ProtoState::TcpInit1 | ProtoState::UdpReq | ProtoState::IcmpEchoReq
        )
    }

    /// Last state of its protocol family; an accepted packet in this state
    /// finishes the connection.
    #[must_use]
    pub fn is_last(self) -> bool {
        matches!(
            self,
            ProtoState::TcpTerm3 | ProtoState::UdpRep | ProtoState::IcmpEchoRep
        )
    }

    #[must_use]
    pub fn has_syn(self) -> bool {
        matches!(self, ProtoState::TcpInit1 | ProtoState::TcpInit2)
    }

    #[must_use]
    pub fn has_fin(self) -> bool {
        matches!(self, ProtoState::TcpTerm1 | ProtoState::TcpTerm2)
    }

    /// Successor state within the same protocol family, if any.
    #[must_use]
    pub fn next(self) -> Option<ProtoState> {
        use ProtoState::*;
        Some(match self {
            TcpInit1 => TcpInit2,
            TcpInit2 => TcpInit3,
            TcpInit3 => TcpL7Req,
            TcpL7Req => TcpL7ReqA,
            TcpL7ReqA => TcpL7Rep,
            TcpL7Rep => TcpL7RepA,
            TcpL7RepA => TcpTerm1,
            TcpTerm1 => TcpTerm2,
            TcpTerm2 => TcpTerm3,
            TcpTerm3 | UdpRep | IcmpEchoRep => return None,
            UdpReq => UdpRep,
            IcmpEchoReq => IcmpEchoRep,
        })
    }

    /// First state of the given protocol family.
    #[must_use]
    pub fn first_of(protocol: Protocol) -> ProtoState {
        match protocol {
            Protocol::Tcp => ProtoState::TcpInit1,
            Protocol::Udp => ProtoState::UdpReq,
            Protocol::IcmpEcho => ProtoState::IcmpEchoReq,
        }
    }
}

impl Display for ProtoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ProtoState::*;
        let s = match self {
            TcpInit1 => "TCP_INIT_1",
            TcpInit2 => "TCP_INIT_2",
            TcpInit3 => "TCP_INIT_3",
            TcpL7Req => "TCP_L7_REQ",
            TcpL7ReqA => "TCP_L7_REQ_A",
            TcpL7Rep => "TCP_L7_REP",
            TcpL7RepA => "TCP_L7_REP_A",
            TcpTerm1 => "TCP_TERM_1",
            TcpTerm2 => "TCP_TERM_2",
            TcpTerm3 => "TCP_TERM_3",
            UdpReq => "UDP_REQ",
            UdpRep => "UDP_REP",
            IcmpEchoReq => "ICMP_ECHO_REQ",
            IcmpEchoRep => "ICMP_ECHO_REP",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successors_stay_in_family() {
        let mut state = ProtoState::TcpInit1;
        let mut count = 1;
        while let Some(next) = state.next() {
            assert_eq!(next.protocol(), Protocol::Tcp);
            state = next;
            count += 1;
        }
        assert_eq!(count, 10);
        assert!(state.is_last());

        assert_eq!(ProtoState::UdpReq.next(), Some(ProtoState::UdpRep));
        assert_eq!(ProtoState::UdpRep.next(), None);
        assert_eq!(ProtoState::IcmpEchoReq.next(), Some(ProtoState::IcmpEchoRep));
    }

    #[test]
    fn direction_flips_through_the_handshake() {
        use ProtoState::*;
        // SYN -> SYN/ACK -> ACK alternate; REQ_A and REP share the reply side.
        assert!(TcpInit1.is_request_dir());
        assert!(TcpInit2.is_reply_dir());
        assert!(TcpInit3.is_request_dir());
        assert!(TcpL7ReqA.is_reply_dir());
        assert!(TcpL7Rep.is_reply_dir());
        assert!(TcpL7RepA.is_request_dir());
        assert!(TcpTerm1.is_request_dir());
        assert!(TcpTerm2.is_reply_dir());
    }

    #[test]
    fn request_reply_markers() {
        assert!(ProtoState::TcpL7Req.is_request());
        assert!(!ProtoState::TcpInit1.is_request());
        assert!(ProtoState::UdpRep.is_reply());
        assert!(ProtoState::IcmpEchoReq.is_first());
        assert!(ProtoState::TcpTerm3.is_last());
        assert!(!ProtoState::TcpL7Rep.is_last());
    }
}
