// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Symbolic initial flows: connection specs, concrete connections, and the
//! Cartesian-product enumerator over concurrent connections.

use crate::choices::Choices;
use crate::fib::build_fib;
use crate::openflow::OpenflowUpdateState;
use crate::state::{ConnState, FwdMode};
use crate::{ModelCtx, ModelError, DYNAMIC_PORT};
use ec::EcIndex;
use net::hist::PacketHistory;
use net::index::NodeIndex;
use net::ip::IpRange;
use net::proto::{Protocol, ProtoState};
use std::collections::BTreeSet;
use std::fmt::{self, Display};

/// One concrete initial flow: protocol, source node, destination EC and
/// ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Connection {
    pub protocol: Protocol,
    pub src_node: NodeIndex,
    pub dst_ip_ec: EcIndex,
    pub src_port: u16,
    pub dst_port: u16,
}

impl Connection {
    /// The initial per-connection slot of the state vector.
    pub fn initial_conn_state(&self, ctx: &mut ModelCtx) -> Result<ConnState, ModelError> {
        let hist = PacketHistory::new(ctx.network.middleboxes());
        let fib = build_fib(&ctx.network, &ctx.ecs, &mut ctx.storage, self.dst_ip_ec);
        Ok(ConnState {
            executable: true,
            fwd_mode: FwdMode::PacketEntry,
            proto_state: ProtoState::first_of(self.protocol),
            src_ip: net::ip::Ipv4Address::new(0),
            src_port: self.src_port,
            dst_port: self.dst_port,
            seq: 0,
            ack: 0,
            src_node: Some(self.src_node),
            tx_node: Some(self.src_node),
            rx_node: None,
            pkt_location: Some(self.src_node),
            ingress_intf: None,
            dst_ip_ec: self.dst_ip_ec,
            fib,
            pkt_hist: ctx.storage.pkt_hists.intern(hist),
            path_choices: ctx.storage.choices.intern(Choices::new()),
            of_state: ctx
                .storage
                .of_update_states
                .intern(OpenflowUpdateState::new()),
            repetition: 0,
        })
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}:{} --> {}:{}",
            self.protocol, self.src_node, self.src_port, self.dst_ip_ec, self.dst_port
        )
    }
}

/// Symbolic description of a set of initial flows.
#[derive(Debug, Clone)]
pub struct ConnSpec {
    pub protocol: Protocol,
    pub src_nodes: BTreeSet<NodeIndex>,
    pub dst_ip: IpRange,
    pub src_port: Option<u16>,
    pub dst_ports: BTreeSet<u16>,
    pub owned_dst_only: bool,
}

impl ConnSpec {
    /// Make sure the spec's destination range is represented in the EC
    /// partition.
    pub fn update_inv_ecs(&self, ecs: &mut ec::EqClassMgr) {
        ecs.add_ec(self.dst_ip, false);
    }

    /// The product `src_nodes x overlapping ECs x dst_ports`. Without
    /// explicit ports, TCP/UDP use the EC manager's port set and ICMP uses
    /// port zero.
    #[must_use]
    pub fn compute_connections(&self, ecs: &ec::EqClassMgr) -> BTreeSet<Connection> {
        let dst_ip_ecs = ecs.overlapped_ecs(&self.dst_ip, self.owned_dst_only);

        let dst_ports: BTreeSet<u16> = if self.dst_ports.is_empty() {
            match self.protocol {
                Protocol::Tcp | Protocol::Udp => ecs.ports().iter().copied().collect(),
                Protocol::IcmpEcho => std::iter::once(0).collect(),
            }
        } else {
            self.dst_ports.clone()
        };

        let mut conns = BTreeSet::new();
        for src_node in &self.src_nodes {
            for dst_ip_ec in &dst_ip_ecs {
                for dst_port in &dst_ports {
                    conns.insert(Connection {
                        protocol: self.protocol,
                        src_node: *src_node,
                        dst_ip_ec: *dst_ip_ec,
                        src_port: self.src_port.unwrap_or(DYNAMIC_PORT),
                        dst_port: *dst_port,
                    });
                }
            }
        }
        conns
    }
}

/// Row-major enumerator over the Cartesian product of per-spec connection
/// sets.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMatrix {
    product: Vec<Vec<Connection>>,
    cursor: Vec<usize>,
    traversed_all: bool,
}

impl ConnectionMatrix {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.product.clear();
        self.cursor.clear();
        self.traversed_all = false;
    }

    pub fn reset(&mut self) {
        for i in &mut self.cursor {
            *i = 0;
        }
        self.traversed_all = false;
    }

    pub fn add(&mut self, conns: BTreeSet<Connection>) {
        self.product.push(conns.into_iter().collect());
        self.cursor.push(0);
    }

    /// Total number of tuples.
    #[must_use]
    pub fn num_conns(&self) -> usize {
        self.product.iter().map(Vec::len).product()
    }

    /// The next tuple, or an empty vector once every tuple has been
    /// yielded.
    pub fn get_next_conns(&mut self) -> Vec<Connection> {
        if self.traversed_all || self.product.iter().any(Vec::is_empty) {
            return Vec::new();
        }
        let conns: Vec<Connection> = self
            .product
            .iter()
            .zip(&self.cursor)
            .map(|(set, &i)| set[i])
            .collect();

        // advance the least-significant dimension first
        let mut dim = 0;
        while dim < self.product.len() {
            self.cursor[dim] += 1;
            if self.cursor[dim] < self.product[dim].len() {
                break;
            }
            self.cursor[dim] = 0;
            dim += 1;
        }
        if dim == self.product.len() {
            self.traversed_all = true;
        }

        conns
    }

    #[must_use]
    pub fn traversed_all(&self) -> bool {
        self.traversed_all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(src: u32, port: u16) -> Connection {
        Connection {
            protocol: Protocol::Tcp,
            src_node: NodeIndex::new(src),
            dst_ip_ec: EcIndex::new(0),
            src_port: DYNAMIC_PORT,
            dst_port: port,
        }
    }

    #[test]
    fn matrix_enumerates_the_full_product() {
        let mut matrix = ConnectionMatrix::new();
        matrix.add([conn(0, 80), conn(0, 443)].into_iter().collect());
        matrix.add([conn(1, 80), conn(1, 443)].into_iter().collect());
        assert_eq!(matrix.num_conns(), 4);

        let mut tuples = Vec::new();
        loop {
            let t = matrix.get_next_conns();
            if t.is_empty() {
                break;
            }
            tuples.push(t);
        }
        assert_eq!(tuples.len(), 4);
        assert!(matrix.traversed_all());
        // every tuple is distinct
        for i in 0..tuples.len() {
            for j in i + 1..tuples.len() {
                assert_ne!(tuples[i], tuples[j]);
            }
        }
    }

    #[test]
    fn reset_replays_the_product() {
        let mut matrix = ConnectionMatrix::new();
        matrix.add([conn(0, 80)].into_iter().collect());
        assert_eq!(matrix.get_next_conns().len(), 1);
        assert!(matrix.get_next_conns().is_empty());

        matrix.reset();
        assert_eq!(matrix.get_next_conns().len(), 1);
    }
}
