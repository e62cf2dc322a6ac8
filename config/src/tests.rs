// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

use super::*;
use model::invariants::Invariant;
use std::io::Write as _;

fn load_str(content: &str) -> Result<Loaded, ConfigError> {
    let mut file = tempfile_path();
    write!(file.1, "{content}").unwrap();
    load(&file.0)
}

fn tempfile_path() -> (std::path::PathBuf, std::fs::File) {
    let path = std::env::temp_dir().join(format!(
        "symnet-config-{}-{:?}.toml",
        std::process::id(),
        std::thread::current().id()
    ));
    let file = std::fs::File::create(&path).unwrap();
    (path, file)
}

const TWO_NODE: &str = r#"
[[nodes]]
name = "r0"
type = "model"
interfaces = [{ name = "eth0", ipv4 = "192.168.1.11/24" }]

[[nodes]]
name = "r1"
interfaces = [{ name = "eth0", ipv4 = "192.168.1.22/24" }]

[[links]]
node1 = "r0"
intf1 = "eth0"
node2 = "r1"
intf2 = "eth0"

[[invariants]]
type = "reachability"
target_node = "r1"
reachable = true

[[invariants.connections]]
protocol = "tcp"
src_node = "r0"
dst_ip = "192.168.1.22"
dst_port = [80]
"#;

#[test]
fn two_node_config_loads() {
    let loaded = load_str(TWO_NODE).unwrap();
    assert_eq!(loaded.network.num_nodes(), 2);
    assert_eq!(loaded.network.links().len(), 1);
    assert_eq!(loaded.invariants.len(), 1);
    assert!(matches!(loaded.invariants[0], Invariant::Reachability(_)));
    assert!(loaded.openflow.is_empty());
}

#[test]
fn missing_reachable_is_fatal() {
    let bad = TWO_NODE.replace("reachable = true\n", "");
    assert!(matches!(
        load_str(&bad),
        Err(ConfigError::MissingField("reachable"))
    ));
}

#[test]
fn unknown_link_endpoint_is_fatal() {
    let bad = TWO_NODE.replace("node2 = \"r1\"", "node2 = \"r9\"");
    assert!(matches!(load_str(&bad), Err(ConfigError::UnknownNode(_))));
}

#[test]
fn invalid_adm_dist_is_fatal() {
    let bad = format!(
        "{TWO_NODE}\n[[nodes]]\nname = \"r2\"\nstatic_routes = [{{ network = \"10.0.0.0/8\", next_hop = \"192.168.1.1\", adm_dist = 255 }}]\n"
    );
    assert!(matches!(
        load_str(&bad),
        Err(ConfigError::InvalidAdmDist(255))
    ));
}

#[test]
fn emulation_node_requires_container() {
    let bad = r#"
[[nodes]]
name = "fw"
type = "emulation"
driver = "docker"
"#;
    assert!(matches!(
        load_str(bad),
        Err(ConfigError::MissingField("container"))
    ));
}

#[test]
fn emulation_node_scrapes_its_config() {
    let cfg = r#"
[[nodes]]
name = "fw"
type = "emulation"
driver = "docker"
interfaces = [{ name = "eth0", ipv4 = "10.0.0.1/24" }]

[nodes.container]
image = "netfilter"
workingDir = "/"
command = ["sh"]
config_files = [{ path = "/rules", content = "-s 10.0.0.0/24 --to 192.168.1.1 port 8080" }]
"#;
    let loaded = load_str(cfg).unwrap();
    let mb = loaded.network.node_by_name("fw").unwrap();
    let def = loaded.network.node(mb).middlebox().unwrap();
    assert_eq!(def.container.image, "netfilter:latest");
    assert!(def.ec_ip_prefixes.contains(&"10.0.0.0/24".parse().unwrap()));
    assert!(def.ec_ip_addrs.contains(&"192.168.1.1".parse().unwrap()));
    assert!(def.ec_ports.contains(&8080));
}

#[test]
fn openflow_updates_resolve_nodes() {
    let cfg = format!(
        "{TWO_NODE}\n[[openflow.updates]]\nnode = \"r0\"\nnetwork = \"10.0.0.0/24\"\noutport = \"eth0\"\n"
    );
    let loaded = load_str(&cfg).unwrap();
    assert!(!loaded.openflow.is_empty());
}

#[test]
fn conditional_invariants_nest() {
    let cfg = r#"
[[nodes]]
name = "c0"
interfaces = [{ name = "eth0", ipv4 = "10.0.0.1/24" }]

[[nodes]]
name = "s0"
interfaces = [{ name = "eth0", ipv4 = "10.0.0.2/24" }]

[[links]]
node1 = "c0"
intf1 = "eth0"
node2 = "s0"
intf2 = "eth0"

[[invariants]]
type = "conditional"

[[invariants.correlated_invariants]]
type = "reachability"
target_node = "s0"
reachable = true
connections = [{ protocol = "tcp", src_node = "c0", dst_ip = "10.0.0.2" }]

[[invariants.correlated_invariants]]
type = "waypoint"
target_node = "s0"
pass_through = true
connections = [{ protocol = "tcp", src_node = "c0", dst_ip = "10.0.0.2" }]
"#;
    let loaded = load_str(cfg).unwrap();
    match &loaded.invariants[0] {
        Invariant::Conditional(cond) => assert_eq!(cond.children.len(), 2),
        other => panic!("expected conditional, got {other}"),
    }
}
