// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Middlebox (emulated appliance) configuration attached to a node.
//!
//! The appliance configuration text is scraped for IPv4 prefixes, addresses
//! and ports so that the EC partition accounts for every value the appliance
//! may key its behavior on.

use net::ip::{IpNetwork, Ipv4Address};
use net::proto::Protocol;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

static IPV4_PREF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}/\d+\b").unwrap()
});
static IPV4_ADDR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?:[^/0-9]|$)").unwrap()
});
static PORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:port\s+|\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}:)(\d+)\b").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Docker,
}

/// Container workload description, mirroring the `container` table of an
/// emulation node in the input file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    pub image: String,
    pub working_dir: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub ports: Vec<(Protocol, u16)>,
    pub env: Vec<(String, String)>,
    pub volume_mounts: Vec<(String, String)>,
    pub sysctls: Vec<(String, String)>,
    /// `(path inside the container, file content)`
    pub config_files: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddleboxDef {
    pub driver: DriverKind,
    pub container: ContainerConfig,
    /// Packet-reception timeout before an injection is considered dropped.
    pub timeout: Duration,
    // EC-relevant values scraped from the appliance configuration.
    pub ec_ip_prefixes: BTreeSet<IpNetwork>,
    pub ec_ip_addrs: BTreeSet<Ipv4Address>,
    pub ec_ports: BTreeSet<u16>,
}

impl MiddleboxDef {
    #[must_use]
    pub fn new(driver: DriverKind, container: ContainerConfig, timeout: Duration) -> Self {
        let mut def = Self {
            driver,
            container,
            timeout,
            ec_ip_prefixes: BTreeSet::new(),
            ec_ip_addrs: BTreeSet::new(),
            ec_ports: BTreeSet::new(),
        };
        def.scrape();
        def
    }

    /// Scan every piece of appliance configuration for IP prefixes,
    /// addresses and ports. Values that fail to parse (e.g. `999.1.1.1`
    /// matched by the liberal pattern) are skipped.
    fn scrape(&mut self) {
        let container = self.container.clone();
        let mut texts: Vec<&str> = Vec::new();
        texts.extend(container.command.iter().map(String::as_str));
        texts.extend(container.args.iter().map(String::as_str));
        texts.extend(container.env.iter().map(|(_, v)| v.as_str()));
        texts.extend(container.config_files.iter().map(|(_, c)| c.as_str()));

        for text in texts {
            self.scrape_config_string(text);
        }
        for (_, port) in &container.ports {
            self.ec_ports.insert(*port);
        }
    }

    fn scrape_config_string(&mut self, text: &str) {
        for m in IPV4_PREF_REGEX.find_iter(text) {
            if let Ok(net) = m.as_str().parse::<IpNetwork>() {
                self.ec_ip_prefixes.insert(net);
            }
        }
        for caps in IPV4_ADDR_REGEX.captures_iter(text) {
            if let Ok(addr) = caps[1].parse::<Ipv4Address>() {
                self.ec_ip_addrs.insert(addr);
            }
        }
        for caps in PORT_REGEX.captures_iter(text) {
            if let Ok(port) = caps[1].parse::<u16>() {
                self.ec_ports.insert(port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def_with_files(files: Vec<(String, String)>) -> MiddleboxDef {
        MiddleboxDef::new(
            DriverKind::Docker,
            ContainerConfig {
                image: "nat:latest".into(),
                working_dir: "/".into(),
                config_files: files,
                ..Default::default()
            },
            Duration::from_millis(100),
        )
    }

    #[test]
    fn scrapes_prefixes_addresses_and_ports() {
        let rules = "iptables -t nat -A POSTROUTING -s 10.0.0.0/24 \
                     -j SNAT --to-source 192.168.1.1\n\
                     listen on 172.16.0.9:8080\n\
                     port 53\n";
        let def = def_with_files(vec![("/etc/rules".into(), rules.into())]);

        assert!(def
            .ec_ip_prefixes
            .contains(&"10.0.0.0/24".parse().unwrap()));
        assert!(def.ec_ip_addrs.contains(&"192.168.1.1".parse().unwrap()));
        assert!(def.ec_ip_addrs.contains(&"172.16.0.9".parse().unwrap()));
        assert!(def.ec_ports.contains(&8080));
        assert!(def.ec_ports.contains(&53));
    }

    #[test]
    fn exposed_ports_are_ec_relevant() {
        let mut container = ContainerConfig::default();
        container.ports.push((Protocol::Tcp, 80));
        let def = MiddleboxDef::new(DriverKind::Docker, container, Duration::from_millis(50));
        assert!(def.ec_ports.contains(&80));
    }
}
