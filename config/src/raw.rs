// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Serde mirror of the TOML schema.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub nodes: Vec<RawNode>,
    pub links: Option<Vec<RawLink>>,
    pub openflow: Option<RawOpenflow>,
    pub invariants: Option<Vec<RawInvariant>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub interfaces: Option<Vec<RawInterface>>,
    pub static_routes: Option<Vec<RawRoute>>,
    pub installed_routes: Option<Vec<RawRoute>>,
    pub driver: Option<String>,
    pub container: Option<RawContainer>,
    /// Packet-reception timeout in milliseconds.
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawInterface {
    pub name: String,
    pub ipv4: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRoute {
    pub network: String,
    pub next_hop: Option<String>,
    pub interface: Option<String>,
    pub adm_dist: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLink {
    pub node1: String,
    pub intf1: String,
    pub node2: String,
    pub intf2: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawContainer {
    pub image: String,
    #[serde(rename = "workingDir")]
    pub working_dir: String,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub ports: Option<Vec<RawPort>>,
    pub env: Option<Vec<RawEnv>>,
    #[serde(rename = "volumeMounts")]
    pub volume_mounts: Option<Vec<RawMount>>,
    pub sysctls: Option<Vec<RawSysctl>>,
    pub config_files: Option<Vec<RawConfigFile>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPort {
    #[serde(rename = "containerPort")]
    pub container_port: u16,
    pub protocol: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEnv {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMount {
    #[serde(rename = "hostPath")]
    pub host_path: String,
    #[serde(rename = "mountPath")]
    pub mount_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSysctl {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawOpenflow {
    pub updates: Vec<RawOfUpdate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawOfUpdate {
    pub node: String,
    pub network: String,
    pub outport: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawInvariant {
    #[serde(rename = "type")]
    pub kind: String,
    pub target_node: Option<String>,
    pub reachable: Option<bool>,
    pub pass_through: Option<bool>,
    pub max_dispersion_index: Option<f64>,
    pub connections: Option<Vec<RawConnection>>,
    pub correlated_invariants: Option<Vec<RawInvariant>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConnection {
    pub protocol: String,
    pub src_node: String,
    pub dst_ip: String,
    pub src_port: Option<u16>,
    pub dst_port: Option<Vec<u16>>,
    pub owned_dst_only: Option<bool>,
}
