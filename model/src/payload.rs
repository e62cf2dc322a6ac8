// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! L7 payload templates keyed by `(destination EC, destination port,
//! protocol phase)`, so identical requests always serialise to identical
//! bytes.

use ahash::AHashMap;
use ec::{EcIndex, EqClassMgr};
use net::payload::Payload;
use net::proto::ProtoState;
use storage::{Interned, Interner};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PayloadKey {
    pub dst_ip_ec: EcIndex,
    pub dst_port: u16,
    pub proto_state: ProtoState,
}

#[derive(Default)]
pub struct PayloadMgr {
    tbl: AHashMap<PayloadKey, Option<Interned<Payload>>>,
}

impl PayloadMgr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload carried in the given phase, or `None` for phases without
    /// one. Only the L7 request and reply carry bytes: a templated HTTP GET
    /// and a templated 200 OK.
    pub fn payload(
        &mut self,
        ecs: &EqClassMgr,
        payloads: &mut Interner<Payload>,
        key: PayloadKey,
    ) -> Option<Interned<Payload>> {
        if let Some(cached) = self.tbl.get(&key) {
            return cached.clone();
        }

        let content = match key.proto_state {
            ProtoState::TcpL7Req => {
                let host = ecs.ec(key.dst_ip_ec).representative_addr();
                Some(format!(
                    "GET / HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
                    host, key.dst_port
                ))
            }
            ProtoState::TcpL7Rep => {
                let body = "<!DOCTYPE html><html><head><title>Reply</title></head>\
                            <body>Reply</body></html>\r\n";
                Some(format!(
                    "HTTP/1.1 200 OK\r\nServer: symnet\r\nContent-Type: text/html\r\n\
                     Content-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                ))
            }
            _ => None,
        };

        let payload = content.map(|c| payloads.intern(Payload::from(c.as_str())));
        self.tbl.insert(key, payload.clone());
        payload
    }

    pub fn reset(&mut self) {
        self.tbl.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::ip::IpRange;

    #[test]
    fn identical_keys_yield_identical_bytes() {
        let mut ecs = EqClassMgr::new();
        ecs.add_ec(
            IpRange::new("10.0.0.0".parse().unwrap(), "10.0.0.255".parse().unwrap()).unwrap(),
            false,
        );
        let ec = ecs.find_ec("10.0.0.1".parse().unwrap()).unwrap();

        let mut mgr = PayloadMgr::new();
        let mut interner = Interner::new();
        let key = PayloadKey {
            dst_ip_ec: ec,
            dst_port: 80,
            proto_state: ProtoState::TcpL7Req,
        };
        let a = mgr.payload(&ecs, &mut interner, key).unwrap();
        let b = mgr.payload(&ecs, &mut interner, key).unwrap();
        assert!(a.ptr_eq(&b));
        assert!(std::str::from_utf8(a.bytes()).unwrap().starts_with("GET /"));
    }

    #[test]
    fn handshake_phases_carry_no_payload() {
        let mut ecs = EqClassMgr::new();
        ecs.add_ec(
            IpRange::new("10.0.0.0".parse().unwrap(), "10.0.0.0".parse().unwrap()).unwrap(),
            false,
        );
        let ec = ecs.find_ec("10.0.0.0".parse().unwrap()).unwrap();

        let mut mgr = PayloadMgr::new();
        let mut interner = Interner::new();
        let key = PayloadKey {
            dst_ip_ec: ec,
            dst_port: 80,
            proto_state: ProtoState::TcpInit1,
        };
        assert!(mgr.payload(&ecs, &mut interner, key).is_none());
    }
}
