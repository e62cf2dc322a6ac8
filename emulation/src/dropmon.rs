// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Kernel packet-drop detection over the drop-monitor generic-netlink family.
//!
//! The contract is deliberately small: arm the monitor before an injection,
//! block for a drop alert with a timeout, and report the alert timestamp. A
//! zero timestamp means no drop was observed. The monitor is optional; when
//! disabled every call is a no-op and timeouts are interpreted as implicit
//! drops by the forwarding process.

use crate::EmulationError;
use net::packet::Packet;
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// `sizeof(struct nlmsghdr)`, already 4-byte aligned.
const NLMSG_HDRLEN: usize = 16;
const NLM_F_REQUEST: u16 = 1;
const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;

const NET_DM_FAMILY_NAME: &[u8] = b"NET_DM";
const NET_DM_CMD_START: u8 = 2;
const NET_DM_CMD_STOP: u8 = 3;
const NET_DM_CMD_PACKET_ALERT: u8 = 5;

#[repr(C)]
#[derive(Copy, Clone)]
struct GenlMsgHdr {
    cmd: u8,
    version: u8,
    reserved: u16,
}

/// A pending filter for the packet we expect the kernel to drop.
#[derive(Debug, Default)]
struct Target {
    pkt: Option<Packet>,
}

#[derive(Debug)]
pub struct DropMon {
    fd: RawFd,
    family_id: u16,
    enabled: bool,
    target: Mutex<Target>,
}

impl DropMon {
    /// Open the netlink socket and resolve the drop-monitor family. Fails
    /// softly: a verifier without drop-monitor support still runs, treating
    /// every timeout as an implicit drop.
    pub fn init() -> Result<Self, EmulationError> {
        let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, libc::NETLINK_GENERIC) };
        if fd < 0 {
            return Err(EmulationError::Netlink(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        let mut mon = Self {
            fd,
            family_id: 0,
            enabled: false,
            target: Mutex::new(Target::default()),
        };
        mon.family_id = mon.resolve_family()?;
        mon.enabled = true;
        debug!("drop monitor family id: {}", mon.family_id);
        Ok(mon)
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Put the kernel monitor in alert mode.
    pub fn start(&self) -> Result<(), EmulationError> {
        self.send_cmd(self.family_id, NET_DM_CMD_START)
    }

    pub fn stop(&self) -> Result<(), EmulationError> {
        self.send_cmd(self.family_id, NET_DM_CMD_STOP)
    }

    /// Arm the monitor for one packet; called before every injection.
    pub fn start_listening_for(&self, pkt: &Packet) {
        if !self.enabled {
            return;
        }
        self.target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pkt = Some(pkt.clone());
    }

    /// Called after the injection outcome is known.
    pub fn stop_listening(&self) {
        if !self.enabled {
            return;
        }
        self.target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pkt = None;
    }

    /// Block up to `timeout` for a drop alert matching the armed packet.
    /// Returns the alert timestamp in nanoseconds, or 0 when nothing was
    /// observed.
    pub fn drop_ts(&self, timeout: Duration) -> u64 {
        if !self.enabled {
            return 0;
        }
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return 0;
            }
            match self.recv_alert(remaining) {
                Ok(true) => {
                    return SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map_or(1, |d| d.as_nanos() as u64);
                }
                Ok(false) => {} // unrelated message, keep waiting
                Err(e) => {
                    warn!("drop monitor receive: {e}");
                    return 0;
                }
            }
        }
    }

    fn resolve_family(&self) -> Result<u16, EmulationError> {
        let mut attr = Vec::new();
        put_attr(&mut attr, CTRL_ATTR_FAMILY_NAME, NET_DM_FAMILY_NAME);
        self.send_msg(GENL_ID_CTRL, CTRL_CMD_GETFAMILY, &attr)?;

        let buf = self.recv_msg(Duration::from_secs(1))?;
        parse_family_id(&buf).ok_or_else(|| {
            EmulationError::Netlink("drop-monitor family not available".to_owned())
        })
    }

    fn send_cmd(&self, family: u16, cmd: u8) -> Result<(), EmulationError> {
        self.send_msg(family, cmd, &[])
    }

    fn send_msg(&self, msg_type: u16, cmd: u8, attrs: &[u8]) -> Result<(), EmulationError> {
        let genl = GenlMsgHdr {
            cmd,
            version: 1,
            reserved: 0,
        };
        let genl_bytes: [u8; 4] = unsafe { std::mem::transmute(genl) };
        let payload_len = 4 + attrs.len();
        let total_len = NLMSG_HDRLEN + payload_len;

        let mut buf = Vec::with_capacity(total_len);
        buf.extend_from_slice(&(total_len as u32).to_ne_bytes());
        buf.extend_from_slice(&msg_type.to_ne_bytes());
        buf.extend_from_slice(&NLM_F_REQUEST.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes()); // seq
        buf.extend_from_slice(&0u32.to_ne_bytes()); // pid
        buf.extend_from_slice(&genl_bytes);
        buf.extend_from_slice(attrs);

        let n = unsafe { libc::send(self.fd, buf.as_ptr().cast(), buf.len(), 0) };
        if n < 0 {
            return Err(EmulationError::Netlink(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }

    fn recv_msg(&self, timeout: Duration) -> Result<Vec<u8>, EmulationError> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
        if rc <= 0 {
            return Err(EmulationError::Netlink("timed out".to_owned()));
        }
        let mut buf = vec![0u8; 8192];
        let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
        if n < 0 {
            return Err(EmulationError::Netlink(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        buf.truncate(n as usize);
        Ok(buf)
    }

    /// Read one message; `Ok(true)` iff it is a packet alert while a target
    /// packet is armed. Alert payloads are not decoded further; arming
    /// brackets each injection tightly enough to attribute the drop.
    fn recv_alert(&self, timeout: Duration) -> Result<bool, EmulationError> {
        let buf = self.recv_msg(timeout)?;
        if buf.len() < NLMSG_HDRLEN + 4 {
            return Ok(false);
        }
        let msg_type = u16::from_ne_bytes([buf[4], buf[5]]);
        if msg_type != self.family_id {
            return Ok(false);
        }
        let armed = self
            .target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pkt
            .is_some();
        let cmd = buf[NLMSG_HDRLEN];
        Ok(armed && cmd == NET_DM_CMD_PACKET_ALERT)
    }
}

impl Drop for DropMon {
    fn drop(&mut self) {
        if self.enabled {
            let _ = self.stop();
        }
        unsafe { libc::close(self.fd) };
    }
}

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

fn put_attr(buf: &mut Vec<u8>, attr_type: u16, data: &[u8]) {
    // nla_len covers the header plus the unpadded payload (nul-terminated
    // for strings, which NET_DM's family name already is not; add one)
    let payload_len = data.len() + 1;
    let nla_len = 4 + payload_len;
    buf.extend_from_slice(&(nla_len as u16).to_ne_bytes());
    buf.extend_from_slice(&attr_type.to_ne_bytes());
    buf.extend_from_slice(data);
    buf.push(0);
    buf.resize(buf.len() + (align4(nla_len) - nla_len), 0);
}

/// Walk the genetlink attributes of a CTRL_CMD_GETFAMILY reply for the
/// family id.
fn parse_family_id(buf: &[u8]) -> Option<u16> {
    let hdr = NLMSG_HDRLEN;
    if buf.len() < hdr + 4 {
        return None;
    }
    let mut off = hdr + 4; // skip the genl header
    while off + 4 <= buf.len() {
        let nla_len = u16::from_ne_bytes([buf[off], buf[off + 1]]) as usize;
        let nla_type = u16::from_ne_bytes([buf[off + 2], buf[off + 3]]);
        if nla_len < 4 || off + nla_len > buf.len() {
            return None;
        }
        if nla_type == CTRL_ATTR_FAMILY_ID && nla_len >= 6 {
            return Some(u16::from_ne_bytes([buf[off + 4], buf[off + 5]]));
        }
        off += align4(nla_len);
    }
    None
}
