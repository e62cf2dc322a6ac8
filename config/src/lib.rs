// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! TOML configuration loading.
//!
//! Parses the input file into the network under verification, the pending
//! openflow updates, and the invariants to check. Every problem found here
//! is fatal: the loader reports the reason and the binary exits.

mod raw;

use model::conn::ConnSpec;
use model::invariants::{
    Conditional, Consistency, Invariant, InvariantData, LoadBalance, LoopInv, OneRequest,
    Reachability, ReplyReachability, Waypoint,
};
use model::openflow::OpenflowProcess;
use net::index::NodeIndex;
use net::ip::{IpRange, Ipv4Address};
use net::proto::Protocol;
use raw::*;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use topology::route::{Route, ADM_DIST_STATIC};
use topology::{
    ContainerConfig, DriverKind, Interface, MiddleboxDef, Network, Node, TopologyError,
};
use tracing::info;

/// Default packet-reception timeout of an emulation when the input does not
/// configure one.
const DEFAULT_EMULATION_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("unknown invariant type: {0}")]
    UnknownInvariantType(String),

    #[error("invalid administrative distance: {0}")]
    InvalidAdmDist(i64),

    #[error("invalid regex '{0}': {1}")]
    InvalidRegex(String, regex::Error),

    #[error("no node matches '{0}'")]
    NoMatchingNode(String),

    #[error("a correlated invariant needs exactly one connection spec")]
    CorrelatedConnCount,

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Net(#[from] net::NetError),
}

/// Everything the driver needs, loaded and resolved.
pub struct Loaded {
    pub network: Network,
    pub openflow: OpenflowProcess,
    pub invariants: Vec<Invariant>,
}

pub fn load(path: &Path) -> Result<Loaded, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let raw: RawConfig = toml::from_str(&text)?;

    let network = build_network(&raw)?;
    let openflow = build_openflow(&raw, &network)?;
    let invariants = raw
        .invariants
        .iter()
        .flatten()
        .map(|inv| build_invariant(inv, &network))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        "loaded {} nodes, {} links, {} invariants",
        network.num_nodes(),
        network.links().len(),
        invariants.len()
    );
    Ok(Loaded {
        network,
        openflow,
        invariants,
    })
}

fn build_network(raw: &RawConfig) -> Result<Network, ConfigError> {
    let mut network = Network::new();

    for raw_node in &raw.nodes {
        let middlebox = match raw_node.kind.as_deref().unwrap_or("model") {
            "model" => None,
            "emulation" => Some(build_middlebox(raw_node)?),
            other => return Err(ConfigError::UnknownNodeType(other.to_owned())),
        };
        let node_idx = network.add_node(Node::new(&raw_node.name, middlebox))?;

        for raw_intf in raw_node.interfaces.iter().flatten() {
            let intf = match &raw_intf.ipv4 {
                Some(cidr) => Interface::l3(&raw_intf.name, cidr.parse()?),
                None => Interface::switchport(&raw_intf.name),
            };
            network.add_interface(node_idx, intf)?;
        }

        for raw_route in raw_node.static_routes.iter().flatten() {
            let mut route = parse_route(raw_route)?;
            if raw_route.adm_dist.is_none() {
                route.set_adm_dist(ADM_DIST_STATIC);
            }
            network.node_mut(node_idx).rib_mut().insert(route);
        }
        for raw_route in raw_node.installed_routes.iter().flatten() {
            let route = parse_route(raw_route)?;
            network.node_mut(node_idx).rib_mut().insert(route);
        }
    }

    for raw_link in raw.links.iter().flatten() {
        let node1 = lookup_node(&network, &raw_link.node1)?;
        let node2 = lookup_node(&network, &raw_link.node2)?;
        let intf1 = network
            .node(node1)
            .intf_by_name(&raw_link.intf1)
            .ok_or(ConfigError::MissingField("intf1"))?;
        let intf2 = network
            .node(node2)
            .intf_by_name(&raw_link.intf2)
            .ok_or(ConfigError::MissingField("intf2"))?;
        network.add_link(node1, intf1, node2, intf2)?;
    }

    network.grow_l2_lans();
    Ok(network)
}

fn build_middlebox(raw_node: &RawNode) -> Result<MiddleboxDef, ConfigError> {
    match raw_node.driver.as_deref() {
        Some("docker") => {}
        Some(other) => return Err(ConfigError::UnknownDriver(other.to_owned())),
        None => return Err(ConfigError::MissingField("driver")),
    }
    let raw_cntr = raw_node
        .container
        .as_ref()
        .ok_or(ConfigError::MissingField("container"))?;

    let mut image = raw_cntr.image.clone();
    if !image.contains(':') {
        image.push_str(":latest");
    }

    let mut ports = Vec::new();
    for raw_port in raw_cntr.ports.iter().flatten() {
        ports.push((parse_protocol(&raw_port.protocol)?, raw_port.container_port));
    }

    let container = ContainerConfig {
        image,
        working_dir: raw_cntr.working_dir.clone(),
        command: raw_cntr.command.clone().unwrap_or_default(),
        args: raw_cntr.args.clone().unwrap_or_default(),
        ports,
        env: raw_cntr
            .env
            .iter()
            .flatten()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect(),
        volume_mounts: raw_cntr
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| (m.host_path.clone(), m.mount_path.clone()))
            .collect(),
        sysctls: raw_cntr
            .sysctls
            .iter()
            .flatten()
            .map(|s| (s.key.clone(), s.value.clone()))
            .collect(),
        config_files: raw_cntr
            .config_files
            .iter()
            .flatten()
            .map(|f| (f.path.clone(), f.content.clone()))
            .collect(),
    };

    let timeout = raw_node
        .timeout
        .map_or(DEFAULT_EMULATION_TIMEOUT, Duration::from_millis);
    Ok(MiddleboxDef::new(DriverKind::Docker, container, timeout))
}

fn build_openflow(raw: &RawConfig, network: &Network) -> Result<OpenflowProcess, ConfigError> {
    let mut updates: BTreeMap<NodeIndex, Vec<Route>> = BTreeMap::new();
    if let Some(raw_of) = &raw.openflow {
        for update in &raw_of.updates {
            let node = lookup_node(network, &update.node)?;
            let network_prefix = update.network.parse()?;
            let route = Route::new(
                network_prefix,
                None,
                Some(update.outport.clone()),
                ADM_DIST_STATIC,
            );
            updates.entry(node).or_default().push(route);
        }
    }
    Ok(OpenflowProcess::new(updates))
}

fn build_invariant(raw: &RawInvariant, network: &Network) -> Result<Invariant, ConfigError> {
    let children = || -> Result<Vec<Invariant>, ConfigError> {
        let children = raw
            .correlated_invariants
            .iter()
            .flatten()
            .map(|c| {
                // correlated children are leaves with exactly one spec
                if c.correlated_invariants.is_some()
                    || c.connections.as_ref().map_or(0, Vec::len) != 1
                {
                    return Err(ConfigError::CorrelatedConnCount);
                }
                build_invariant(c, network)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if children.is_empty() {
            return Err(ConfigError::MissingField("correlated_invariants"));
        }
        Ok(children)
    };

    Ok(match raw.kind.as_str() {
        "reachability" => Invariant::Reachability(Reachability {
            data: invariant_data(raw, network)?,
            target_nodes: target_nodes(raw, network)?,
            reachable: raw
                .reachable
                .ok_or(ConfigError::MissingField("reachable"))?,
        }),
        "reply-reachability" => Invariant::ReplyReachability(ReplyReachability {
            data: invariant_data(raw, network)?,
            target_nodes: target_nodes(raw, network)?,
            reachable: raw
                .reachable
                .ok_or(ConfigError::MissingField("reachable"))?,
        }),
        "waypoint" => Invariant::Waypoint(Waypoint {
            data: invariant_data(raw, network)?,
            target_nodes: target_nodes(raw, network)?,
            pass_through: raw
                .pass_through
                .ok_or(ConfigError::MissingField("pass_through"))?,
        }),
        "loop" => Invariant::Loop(LoopInv {
            data: invariant_data(raw, network)?,
        }),
        "one-request" => Invariant::OneRequest(OneRequest {
            data: invariant_data(raw, network)?,
            target_nodes: target_nodes(raw, network)?,
        }),
        "loadbalance" => Invariant::LoadBalance(LoadBalance {
            data: invariant_data(raw, network)?,
            target_nodes: target_nodes(raw, network)?,
            max_dispersion_index: raw
                .max_dispersion_index
                .ok_or(ConfigError::MissingField("max_dispersion_index"))?,
        }),
        "conditional" => Invariant::Conditional(Conditional::new(children()?)),
        "consistency" => Invariant::Consistency(Consistency::new(children()?)),
        other => return Err(ConfigError::UnknownInvariantType(other.to_owned())),
    })
}

fn invariant_data(raw: &RawInvariant, network: &Network) -> Result<InvariantData, ConfigError> {
    let conn_specs = raw
        .connections
        .iter()
        .flatten()
        .map(|c| build_conn_spec(c, network))
        .collect::<Result<Vec<_>, _>>()?;
    if conn_specs.is_empty() {
        return Err(ConfigError::MissingField("connections"));
    }
    if raw.correlated_invariants.is_some() && conn_specs.len() != 1 {
        return Err(ConfigError::CorrelatedConnCount);
    }
    Ok(InvariantData {
        conn_specs,
        ..Default::default()
    })
}

fn build_conn_spec(raw: &RawConnection, network: &Network) -> Result<ConnSpec, ConfigError> {
    Ok(ConnSpec {
        protocol: parse_protocol(&raw.protocol)?,
        src_nodes: match_nodes(network, &raw.src_node)?,
        dst_ip: parse_ip_or_cidr(&raw.dst_ip)?,
        src_port: raw.src_port,
        dst_ports: raw.dst_port.clone().unwrap_or_default().into_iter().collect(),
        owned_dst_only: raw.owned_dst_only.unwrap_or(false),
    })
}

fn target_nodes(
    raw: &RawInvariant,
    network: &Network,
) -> Result<BTreeSet<NodeIndex>, ConfigError> {
    let pattern = raw
        .target_node
        .as_ref()
        .ok_or(ConfigError::MissingField("target_node"))?;
    match_nodes(network, pattern)
}

/// Resolve a node-name regex into the set of matching nodes.
fn match_nodes(network: &Network, pattern: &str) -> Result<BTreeSet<NodeIndex>, ConfigError> {
    let re = Regex::new(pattern)
        .map_err(|e| ConfigError::InvalidRegex(pattern.to_owned(), e))?;
    let matched: BTreeSet<NodeIndex> = network
        .nodes()
        .filter(|(_, node)| re.is_match(node.name()))
        .map(|(idx, _)| idx)
        .collect();
    if matched.is_empty() {
        return Err(ConfigError::NoMatchingNode(pattern.to_owned()));
    }
    Ok(matched)
}

fn lookup_node(network: &Network, name: &str) -> Result<NodeIndex, ConfigError> {
    network
        .node_by_name(name)
        .ok_or_else(|| ConfigError::UnknownNode(name.to_owned()))
}

fn parse_route(raw: &RawRoute) -> Result<Route, ConfigError> {
    if raw.next_hop.is_none() && raw.interface.is_none() {
        return Err(ConfigError::MissingField("next hop IP address and interface"));
    }
    let adm_dist = match raw.adm_dist {
        Some(dist) if !(1..=254).contains(&dist) => {
            return Err(ConfigError::InvalidAdmDist(dist));
        }
        Some(dist) => dist as u8,
        None => 255,
    };
    let next_hop = raw
        .next_hop
        .as_ref()
        .map(|s| s.parse::<Ipv4Address>())
        .transpose()?;
    Ok(Route::new(
        raw.network.parse()?,
        next_hop,
        raw.interface.clone(),
        adm_dist,
    ))
}

fn parse_protocol(s: &str) -> Result<Protocol, ConfigError> {
    match s.to_ascii_lowercase().as_str() {
        "tcp" => Ok(Protocol::Tcp),
        "udp" => Ok(Protocol::Udp),
        "icmp-echo" => Ok(Protocol::IcmpEcho),
        other => Err(ConfigError::UnknownProtocol(other.to_owned())),
    }
}

/// A destination is either a CIDR prefix or a single host address.
fn parse_ip_or_cidr(s: &str) -> Result<IpRange, ConfigError> {
    if s.contains('/') {
        Ok(IpRange::from(s.parse::<net::ip::IpNetwork>()?))
    } else {
        Ok(IpRange::host(s.parse()?))
    }
}

#[cfg(test)]
mod tests;
