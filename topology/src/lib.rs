// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! The static network under verification: nodes, interfaces, links, routing
//! tables and L2 flood domains, plus the resolution of per-address IP next
//! hops that the FIB builder consumes.

pub mod interface;
pub mod l2lan;
pub mod link;
pub mod middlebox;
pub mod network;
pub mod node;
pub mod rib;
pub mod route;

pub use interface::Interface;
pub use l2lan::{L2Lan, LanIndex};
pub use link::Link;
pub use middlebox::{ContainerConfig, DriverKind, MiddleboxDef};
pub use network::{IpNextHop, Network};
pub use node::Node;
pub use rib::RoutingTable;
pub use route::Route;

use net::NetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    #[error("duplicate interface name on {0}: {1}")]
    DuplicateInterface(String, String),

    #[error("duplicate interface IP on {0}: {1}")]
    DuplicateInterfaceIp(String, String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("{0} doesn't have interface {1}")]
    UnknownInterface(String, String),

    #[error("{0} doesn't own {1}")]
    UnknownInterfaceIp(String, String),

    #[error("duplicate link: {0}")]
    DuplicateLink(String),

    #[error("two peers on interface: {0}")]
    DuplicatePeer(String),

    #[error("invalid administrative distance: {0}")]
    InvalidAdmDist(i64),

    #[error(transparent)]
    Net(#[from] NetError),
}
