// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Container driver for emulated appliances.
//!
//! The core only relies on the contract exposed here: start/stop/reset the
//! appliance workload, inject a raw frame on one of its model interfaces,
//! and block until a frame emerges on any of them. The docker variant runs
//! the configured image, wires one veth pair per model interface into the
//! container's network namespace, and opens an `AF_PACKET` socket on the
//! host side of each pair.

use crate::EmulationError;
use ahash::AHashMap;
use net::index::IntfIndex;
use net::ip::IpInterface;
use std::os::fd::RawFd;
use std::process::Command;
use std::time::Duration;
use topology::ContainerConfig;
use tracing::{debug, warn};

/// Static description of one wired interface: the model index, the interface
/// name inside the container, and the host-side veth name the packet socket
/// binds to.
#[derive(Debug, Clone)]
pub struct DriverIntf {
    pub intf: IntfIndex,
    pub name: String,
    pub host_veth: String,
    pub ipv4: IpInterface,
}

/// Static routes and ARP entries applied inside the appliance namespace so
/// it forwards the way the model expects.
#[derive(Debug, Clone, Default)]
pub struct DriverL3Config {
    /// `(network CIDR, gateway)` pairs.
    pub routes: Vec<(String, String)>,
    /// `(address, interface name)` static ARP entries, all answering with the
    /// model MAC.
    pub arp_entries: Vec<(String, String)>,
}

/// Tagged driver family. Only docker is supported.
#[derive(Debug)]
pub enum Driver {
    Docker(DockerDriver),
}

impl Driver {
    pub fn docker(
        node_name: &str,
        container: ContainerConfig,
        intfs: Vec<DriverIntf>,
        l3: DriverL3Config,
    ) -> Self {
        Driver::Docker(DockerDriver::new(node_name, container, intfs, l3))
    }

    pub fn init(&mut self) -> Result<(), EmulationError> {
        match self {
            Driver::Docker(d) => d.init(),
        }
    }

    pub fn teardown(&mut self) -> Result<(), EmulationError> {
        match self {
            Driver::Docker(d) => d.teardown(),
        }
    }

    /// Soft restart: bring the appliance back to its post-`init` state
    /// without rebuilding the wiring. Shared so it can run while the
    /// collector threads hold the driver.
    pub fn reset(&self) -> Result<(), EmulationError> {
        match self {
            Driver::Docker(d) => d.reset(),
        }
    }

    pub fn inject(&self, intf: IntfIndex, frame: &[u8]) -> Result<usize, EmulationError> {
        match self {
            Driver::Docker(d) => d.inject(intf, frame),
        }
    }

    /// Block until a frame emerges on any wired interface or the timeout
    /// fires. Returns `None` on timeout.
    pub fn recv(
        &self,
        timeout: Duration,
    ) -> Result<Option<(IntfIndex, Vec<u8>)>, EmulationError> {
        match self {
            Driver::Docker(d) => d.recv(timeout),
        }
    }

    /// Destination MAC for frames injected on `intf` (the appliance side of
    /// the veth pair).
    pub fn dst_mac(&self, intf: IntfIndex) -> [u8; 6] {
        match self {
            Driver::Docker(d) => d.dst_mac(intf),
        }
    }

    pub fn intfs(&self) -> &[DriverIntf] {
        match self {
            Driver::Docker(d) => &d.intfs,
        }
    }
}

#[derive(Debug)]
struct PacketSock {
    intf: IntfIndex,
    fd: RawFd,
}

#[derive(Debug)]
pub struct DockerDriver {
    container_name: String,
    container: ContainerConfig,
    intfs: Vec<DriverIntf>,
    l3: DriverL3Config,
    socks: Vec<PacketSock>,
    macs: AHashMap<IntfIndex, [u8; 6]>,
    running: bool,
}

impl DockerDriver {
    fn new(
        node_name: &str,
        container: ContainerConfig,
        intfs: Vec<DriverIntf>,
        l3: DriverL3Config,
    ) -> Self {
        Self {
            container_name: format!("symnet.{}.{}", std::process::id(), node_name),
            container,
            intfs,
            l3,
            socks: Vec::new(),
            macs: AHashMap::new(),
            running: false,
        }
    }

    fn docker(args: &[&str]) -> Result<String, EmulationError> {
        debug!("docker {}", args.join(" "));
        let output = Command::new("docker")
            .args(args)
            .output()
            .map_err(EmulationError::Io)?;
        if !output.status.success() {
            return Err(EmulationError::DriverCommand(format!(
                "docker {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    fn exec(&self, cmd: &[&str]) -> Result<String, EmulationError> {
        let mut args = vec!["exec", self.container_name.as_str()];
        args.extend_from_slice(cmd);
        Self::docker(&args)
    }

    fn init(&mut self) -> Result<(), EmulationError> {
        let mut run_args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--rm".into(),
            "--privileged".into(),
            "--network".into(),
            "none".into(),
            "--name".into(),
            self.container_name.clone(),
            "-w".into(),
            self.container.working_dir.clone(),
        ];
        for (key, value) in &self.container.env {
            run_args.push("-e".into());
            run_args.push(format!("{key}={value}"));
        }
        for (host, cntr) in &self.container.volume_mounts {
            run_args.push("-v".into());
            run_args.push(format!("{host}:{cntr}"));
        }
        for (key, value) in &self.container.sysctls {
            run_args.push("--sysctl".into());
            run_args.push(format!("{key}={value}"));
        }
        run_args.push(self.container.image.clone());
        run_args.extend(self.container.command.iter().cloned());
        run_args.extend(self.container.args.iter().cloned());

        let arg_refs: Vec<&str> = run_args.iter().map(String::as_str).collect();
        Self::docker(&arg_refs)?;
        self.running = true;

        self.write_config_files()?;
        self.wire_interfaces()?;
        self.apply_l3_config()?;
        self.open_sockets()?;
        Ok(())
    }

    fn write_config_files(&self) -> Result<(), EmulationError> {
        for (path, content) in &self.container.config_files {
            let encoded = format!("printf '%s' '{}' > {}", content.replace('\'', "'\\''"), path);
            self.exec(&["sh", "-c", &encoded])?;
        }
        Ok(())
    }

    /// Create one veth pair per model interface, move the peer end into the
    /// container namespace, rename and address it there.
    fn wire_interfaces(&mut self) -> Result<(), EmulationError> {
        let pid = Self::docker(&["inspect", "-f", "{{.State.Pid}}", &self.container_name])?;
        for spec in &self.intfs {
            let peer = format!("{}.c", spec.host_veth);
            run_ip(&[
                "link", "add", &spec.host_veth, "type", "veth", "peer", "name", &peer,
            ])?;
            run_ip(&["link", "set", &spec.host_veth, "up"])?;
            run_ip(&["link", "set", &peer, "netns", &pid])?;
            self.exec(&["ip", "link", "set", &peer, "name", &spec.name])?;
            self.exec(&["ip", "addr", "add", &spec.ipv4.to_string(), "dev", &spec.name])?;
            self.exec(&["ip", "link", "set", &spec.name, "up"])?;

            let mac = self
                .exec(&["cat", &format!("/sys/class/net/{}/address", spec.name)])?
                .trim()
                .to_owned();
            self.macs.insert(spec.intf, parse_mac(&mac));
        }
        Ok(())
    }

    fn apply_l3_config(&self) -> Result<(), EmulationError> {
        for (network, gateway) in &self.l3.routes {
            self.exec(&["ip", "route", "add", network, "via", gateway])?;
        }
        for (addr, dev) in &self.l3.arp_entries {
            let mac = mac_string(net::wire::ID_ETH_ADDR);
            self.exec(&[
                "ip", "neigh", "replace", addr, "lladdr", &mac, "dev", dev, "nud", "permanent",
            ])?;
        }
        Ok(())
    }

    fn open_sockets(&mut self) -> Result<(), EmulationError> {
        for spec in &self.intfs {
            let fd = open_packet_socket(&spec.host_veth)?;
            self.socks.push(PacketSock {
                intf: spec.intf,
                fd,
            });
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), EmulationError> {
        for sock in self.socks.drain(..) {
            unsafe { libc::close(sock.fd) };
        }
        for spec in &self.intfs {
            // veth pairs die with their peer; removing the host side is enough
            let _ = run_ip(&["link", "del", &spec.host_veth]);
        }
        if self.running {
            if let Err(e) = Self::docker(&["kill", &self.container_name]) {
                warn!("container teardown: {e}");
            }
            self.running = false;
        }
        self.macs.clear();
        Ok(())
    }

    fn reset(&self) -> Result<(), EmulationError> {
        // restart the workload process tree, keep the namespace and wiring
        Self::docker(&["restart", "-t", "0", &self.container_name])?;
        self.write_config_files()?;
        self.apply_l3_config()?;
        Ok(())
    }

    fn inject(&self, intf: IntfIndex, frame: &[u8]) -> Result<usize, EmulationError> {
        let sock = self
            .socks
            .iter()
            .find(|s| s.intf == intf)
            .ok_or(EmulationError::NotInitialised)?;
        let n = unsafe {
            libc::write(
                sock.fd,
                frame.as_ptr().cast::<libc::c_void>(),
                frame.len(),
            )
        };
        if n < 0 {
            return Err(EmulationError::Socket(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(n as usize)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<(IntfIndex, Vec<u8>)>, EmulationError> {
        if self.socks.is_empty() {
            return Err(EmulationError::NotInitialised);
        }
        let mut pollfds: Vec<libc::pollfd> = self
            .socks
            .iter()
            .map(|s| libc::pollfd {
                fd: s.fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(None); // unblocked by a signal
            }
            return Err(EmulationError::Socket(err.to_string()));
        }
        if rc == 0 {
            return Ok(None);
        }
        for (pollfd, sock) in pollfds.iter().zip(&self.socks) {
            if pollfd.revents & libc::POLLIN != 0 {
                let mut buf = vec![0u8; 65536];
                let n = unsafe {
                    libc::read(sock.fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len())
                };
                if n < 0 {
                    return Err(EmulationError::Socket(
                        std::io::Error::last_os_error().to_string(),
                    ));
                }
                buf.truncate(n as usize);
                return Ok(Some((sock.intf, buf)));
            }
        }
        Ok(None)
    }

    fn dst_mac(&self, intf: IntfIndex) -> [u8; 6] {
        self.macs.get(&intf).copied().unwrap_or([0xFF; 6])
    }
}

impl Drop for DockerDriver {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

fn run_ip(args: &[&str]) -> Result<(), EmulationError> {
    debug!("ip {}", args.join(" "));
    let status = Command::new("ip").args(args).status()?;
    if !status.success() {
        return Err(EmulationError::DriverCommand(format!(
            "ip {} failed",
            args.join(" ")
        )));
    }
    Ok(())
}

fn open_packet_socket(ifname: &str) -> Result<RawFd, EmulationError> {
    let proto = (libc::ETH_P_ALL as u16).to_be();
    let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, i32::from(proto)) };
    if fd < 0 {
        return Err(EmulationError::Socket(
            std::io::Error::last_os_error().to_string(),
        ));
    }

    let ifname_c = std::ffi::CString::new(ifname)
        .map_err(|_| EmulationError::Socket(format!("bad interface name {ifname}")))?;
    let ifindex = unsafe { libc::if_nametoindex(ifname_c.as_ptr()) };
    if ifindex == 0 {
        unsafe { libc::close(fd) };
        return Err(EmulationError::Socket(format!("no such interface {ifname}")));
    }

    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = proto;
    addr.sll_ifindex = ifindex as i32;
    let rc = unsafe {
        libc::bind(
            fd,
            std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(EmulationError::Socket(err.to_string()));
    }
    Ok(fd)
}

fn parse_mac(s: &str) -> [u8; 6] {
    let mut mac = [0u8; 6];
    for (i, part) in s.split(':').take(6).enumerate() {
        mac[i] = u8::from_str_radix(part, 16).unwrap_or(0);
    }
    mac
}

fn mac_string(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
