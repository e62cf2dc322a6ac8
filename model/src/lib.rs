// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The explicit-state model checker: interned state components, the
//! per-connection forwarding automaton, the non-deterministic openflow and
//! scheduling processes, the invariant engine, the depth-first explorer and
//! the fork-per-combination worker driver.

pub mod candidates;
pub mod choices;
pub mod conn;
pub mod driver;
pub mod explorer;
pub mod fib;
pub mod forwarding;
pub mod invariants;
pub mod openflow;
pub mod payload;
pub mod reachcounts;
pub mod scheduler;
pub mod state;
pub mod unique;
pub mod visited;

use ec::{EcError, EqClassMgr};
use emulation::dropmon::DropMon;
use emulation::driver::{Driver, DriverIntf, DriverL3Config};
use emulation::droptimeout::DropTimeout;
use emulation::{EmulationError, EmulationMgr, InjectionCache};
use net::index::NodeIndex;
use net::ip::IpInterface;
use std::sync::Arc;
use thiserror::Error;
use topology::{Network, TopologyError};

pub use explorer::Verdict;

/// Source port used for connections that do not pin one: the first port of
/// the dynamic range.
pub const DYNAMIC_PORT: u16 = 49152;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Ec(#[from] EcError),

    #[error(transparent)]
    Emulation(#[from] EmulationError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("inconsistent model state: {0}")]
    Inconsistent(&'static str),

    #[error("system error: {0}")]
    System(String),
}

/// Everything the processes need besides the state vector itself. Owned per
/// worker; forked workers each hold their own copy.
pub struct ModelCtx {
    pub network: Network,
    pub ecs: EqClassMgr,
    pub storage: unique::UniqueStorage,
    pub payloads: payload::PayloadMgr,
    pub openflow: openflow::OpenflowProcess,
    pub emu_mgr: EmulationMgr,
    pub inj_cache: InjectionCache,
    pub drop_timeout: DropTimeout,
    pub dropmon: Option<Arc<DropMon>>,
}

impl ModelCtx {
    #[must_use]
    pub fn new(network: Network, openflow: openflow::OpenflowProcess, max_emulations: usize) -> Self {
        Self {
            network,
            ecs: EqClassMgr::new(),
            storage: unique::UniqueStorage::new(),
            payloads: payload::PayloadMgr::new(),
            openflow,
            emu_mgr: EmulationMgr::new(max_emulations),
            inj_cache: InjectionCache::new(),
            drop_timeout: DropTimeout::new(),
            dropmon: None,
        }
    }

    /// Build the container driver for a middlebox node: one veth-backed
    /// interface per L3 port, the appliance's non-connected routes, and
    /// static ARP entries for every address reachable on each port's flood
    /// domain.
    pub fn make_driver(&self, mb: NodeIndex) -> Result<Driver, ModelError> {
        let node = self.network.node(mb);
        let def = node
            .middlebox()
            .ok_or(ModelError::Inconsistent("not a middlebox"))?;

        let mut intfs = Vec::new();
        let mut l3 = DriverL3Config::default();
        for (addr, intf_idx) in node.intfs_l3() {
            let intf = self.network.intf(*intf_idx);
            let prefix = intf.prefix_length().unwrap_or(32);
            intfs.push(DriverIntf {
                intf: *intf_idx,
                name: intf.name().to_owned(),
                host_veth: format!("sn{}i{}", mb.index(), intf_idx.index()),
                ipv4: IpInterface::new(*addr, prefix)?,
            });
            if let Some(lan) = self.network.lan_of_intf(*intf_idx) {
                for (peer_node, peer_intf) in lan.endpoints() {
                    if *peer_node == mb {
                        continue;
                    }
                    if let Some(peer_addr) = self.network.intf(*peer_intf).addr() {
                        l3.arp_entries
                            .push((peer_addr.to_string(), intf.name().to_owned()));
                    }
                }
            }
        }
        for route in node.rib().iter() {
            if !route.is_connected() {
                if let Some(nh) = route.next_hop() {
                    l3.routes.push((route.network().to_string(), nh.to_string()));
                }
            }
        }

        Ok(Driver::docker(
            node.name(),
            def.container.clone(),
            intfs,
            l3,
        ))
    }
}

impl From<net::NetError> for ModelError {
    fn from(e: net::NetError) -> Self {
        ModelError::Emulation(EmulationError::Net(e))
    }
}
