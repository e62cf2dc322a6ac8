// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! A live middlebox instance: container driver, collector threads, offset
//! normalisation and the rewind protocol.

use crate::driver::Driver;
use crate::dropmon::DropMon;
use crate::EmulationError;
use ahash::AHashMap;
use net::hist::{extends, NodePacketHistory};
use net::index::NodeIndex;
use net::ip::Ipv4Address;
use net::packet::Packet;
use net::proto::Protocol;
use net::wire;
use stats::Stats;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storage::Interned;
use tracing::{debug, info, warn};

/// How often the collector threads re-check the stop flag while blocking.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Key of the offset maps: the opposite endpoint of a concrete connection as
/// the model sees it. Kept outside the state vector on purpose; offsets are
/// facts about the real world, not about the search.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EmuPktKey {
    ip: Ipv4Address,
    port: u16,
}

impl EmuPktKey {
    #[must_use]
    pub fn new(ip: Ipv4Address, port: u16) -> Self {
        Self { ip, port }
    }
}

#[derive(Debug, Default)]
struct Shared {
    recv_pkts: Mutex<Vec<Packet>>,
    cv: Condvar,
    /// Kernel drop timestamp (nsec); zero when no drop was observed.
    drop_ts: AtomicU64,
    stop_threads: AtomicBool,
    /// Context for phase inference on the receive path.
    last_injected: Mutex<Option<Packet>>,
}

pub struct Emulation {
    mb: NodeIndex,
    driver: Option<Arc<Driver>>,
    dropmon: Option<Arc<DropMon>>,
    shared: Arc<Shared>,
    recv_thread: Option<JoinHandle<()>>,
    drop_thread: Option<JoinHandle<()>>,
    nph: Option<Interned<NodePacketHistory>>,
    seq_offsets: AHashMap<EmuPktKey, u32>,
    port_offsets: AHashMap<EmuPktKey, u16>,
}

impl Emulation {
    /// Start the container and the collector threads for `mb`.
    pub fn init(
        mb: NodeIndex,
        mut driver: Driver,
        dropmon: Option<Arc<DropMon>>,
    ) -> Result<Self, EmulationError> {
        driver.init()?;
        let driver = Arc::new(driver);
        let shared = Arc::new(Shared::default());

        let recv_thread = {
            let driver = Arc::clone(&driver);
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || listen_packets(&driver, &shared))
        };
        let drop_thread = dropmon.as_ref().map(|mon| {
            let mon = Arc::clone(mon);
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || listen_drops(&mon, &shared))
        });

        Ok(Self {
            mb,
            driver: Some(driver),
            dropmon,
            shared,
            recv_thread: Some(recv_thread),
            drop_thread,
            nph: None,
            seq_offsets: AHashMap::new(),
            port_offsets: AHashMap::new(),
        })
    }

    /// A driverless instance for exercising bookkeeping in tests.
    #[cfg(test)]
    pub(crate) fn stub(mb: NodeIndex) -> Self {
        Self {
            mb,
            driver: None,
            dropmon: None,
            shared: Arc::new(Shared::default()),
            recv_thread: None,
            drop_thread: None,
            nph: None,
            seq_offsets: AHashMap::new(),
            port_offsets: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn mb(&self) -> NodeIndex {
        self.mb
    }

    #[must_use]
    pub fn node_pkt_hist(&self) -> Option<&Interned<NodePacketHistory>> {
        self.nph.as_ref()
    }

    pub fn set_node_pkt_hist(&mut self, nph: Option<Interned<NodePacketHistory>>) {
        self.nph = nph;
    }

    /// Stop the collector threads and the container.
    pub fn teardown(&mut self) {
        self.shared.stop_threads.store(true, Ordering::SeqCst);
        if let Some(driver) = &self.driver {
            // unblock a passive read with a contentless frame
            if let Some(spec) = driver.intfs().first() {
                let dummy = Packet::dummy(spec.intf);
                if let Ok(frame) = wire::serialize(&dummy, [0xFF; 6]) {
                    let _ = driver.inject(spec.intf, &frame);
                }
            }
        }
        if let Some(t) = self.recv_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.drop_thread.take() {
            let _ = t.join();
        }
        if let Some(driver) = self.driver.take() {
            match Arc::try_unwrap(driver) {
                Ok(mut driver) => {
                    if let Err(e) = driver.teardown() {
                        warn!("driver teardown: {e}");
                    }
                }
                Err(_) => warn!("driver still shared at teardown"),
            }
        }
        self.nph = None;
        self.reset_offsets();
        self.shared.stop_threads.store(false, Ordering::SeqCst);
    }

    fn reset_offsets(&mut self) {
        self.seq_offsets.clear();
        self.port_offsets.clear();
    }

    /// Bring the appliance to `target`:
    /// equal history — nothing; the appliance already extends the target —
    /// nothing (equal histories yield equal appliance state, so the resident
    /// state is sufficient); the target extends the appliance — replay the
    /// tail; diverged — reset and replay the full chain.
    ///
    /// Returns the number of replayed injections.
    pub fn rewind(
        &mut self,
        target: Option<&Interned<NodePacketHistory>>,
        timeout: Duration,
    ) -> Result<usize, EmulationError> {
        if opt_ptr_eq(self.nph.as_ref(), target) {
            debug!("emulation up to date, no need to rewind");
            return Ok(0);
        }
        Stats::get().start_rewind();

        if extends(self.nph.as_ref(), target) {
            self.nph = target.cloned();
            Stats::get().stop_rewind(0);
            return Ok(0);
        }

        let replay_from = if extends(target, self.nph.as_ref()) {
            self.nph.clone()
        } else {
            let driver = self.driver.as_ref().ok_or(EmulationError::NotInitialised)?;
            driver.reset()?;
            self.reset_offsets();
            None
        };

        let pkts = match target {
            Some(nph) => nph.packets_since(replay_from.as_ref()),
            None => Vec::new(),
        };
        let injections = pkts.len();
        info!("rewinding: replaying {injections} packets");
        for pkt in pkts {
            self.send_pkt(&pkt, timeout)?;
        }
        self.nph = target.cloned();
        Stats::get().stop_rewind(injections);
        Ok(injections)
    }

    /// Inject one packet and collect everything that emerges within the
    /// timeout. Returns the normalised packets and whether the drop monitor
    /// confirmed an explicit drop.
    pub fn send_pkt(
        &mut self,
        pkt: &Packet,
        timeout: Duration,
    ) -> Result<(Vec<Packet>, bool), EmulationError> {
        let driver = self.driver.as_ref().ok_or(EmulationError::NotInitialised)?;
        let intf = pkt
            .ingress_intf
            .ok_or(EmulationError::NotInitialised)?;

        let mut guard = self
            .shared
            .recv_pkts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.clear();
        self.shared.drop_ts.store(0, Ordering::SeqCst);
        *self
            .shared
            .last_injected
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(pkt.clone());

        let mut wire_pkt = pkt.clone();
        self.apply_offsets(&mut wire_pkt);
        let frame = wire::serialize(&wire_pkt, driver.dst_mac(intf))?;

        if let Some(mon) = &self.dropmon {
            mon.start_listening_for(pkt);
        }
        info!("injecting packet: {pkt}");
        driver.inject(intf, &frame)?;
        Stats::get().set_pkt_lat_t1();
        // wall-clock injection time, comparable with the kernel's drop
        // timestamp
        let injected_at_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);

        // wait for the collector, re-checking for spurious wake-ups
        let (mut guard, result) = self
            .shared
            .cv
            .wait_timeout_while(guard, timeout, |pkts| pkts.is_empty())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut pkts = std::mem::take(&mut *guard);
        drop(guard);

        Stats::get().set_pkt_latency();
        if let Some(mon) = &self.dropmon {
            mon.stop_listening();
        }
        if result.timed_out() && pkts.is_empty() {
            debug!("injection timed out");
        }

        self.update_offsets(&mut pkts, pkt);
        let drop_ts = self.shared.drop_ts.load(Ordering::SeqCst);
        let explicit_drop = pkts.is_empty() && drop_ts != 0;
        if explicit_drop {
            Stats::get().record_drop_latency(Duration::from_nanos(
                drop_ts.saturating_sub(injected_at_ns),
            ));
        }
        Ok((pkts, explicit_drop))
    }

    /// Subtract the learned offsets so the appliance sees the values it
    /// would have produced itself.
    fn apply_offsets(&self, pkt: &mut Packet) {
        let key = EmuPktKey::new(pkt.dst_ip, pkt.dst_port);
        if let Some(off) = self.port_offsets.get(&key) {
            pkt.dst_port = pkt.dst_port.wrapping_sub(*off);
        }
        if let Some(off) = self.seq_offsets.get(&key) {
            pkt.ack = pkt.ack.wrapping_sub(*off);
        }
    }

    /// Learn offsets from the first deviation per opposite endpoint, then
    /// add them so the model keeps seeing its own values.
    fn update_offsets(&mut self, recv: &mut [Packet], injected: &Packet) {
        for rp in recv.iter_mut() {
            if rp.dst_ip != injected.src_ip {
                continue; // not a reply toward the model sender
            }
            let key = EmuPktKey::new(rp.src_ip, injected.dst_port);

            let port_off = *self.port_offsets.entry(key).or_insert_with(|| {
                injected.dst_port.wrapping_sub(rp.src_port)
            });
            rp.src_port = rp.src_port.wrapping_add(port_off);

            if rp.proto_state.protocol() == Protocol::Tcp && injected.ack != 0 {
                let seq_off = *self
                    .seq_offsets
                    .entry(key)
                    .or_insert_with(|| injected.ack.wrapping_sub(rp.seq));
                rp.seq = rp.seq.wrapping_add(seq_off);
            }
        }
    }
}

impl Drop for Emulation {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn opt_ptr_eq(
    a: Option<&Interned<NodePacketHistory>>,
    b: Option<&Interned<NodePacketHistory>>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.ptr_eq(b),
        _ => false,
    }
}

/// Collector thread: read frames from the driver, parse the relevant ones
/// and publish them under the shared lock.
fn listen_packets(driver: &Driver, shared: &Shared) {
    while !shared.stop_threads.load(Ordering::SeqCst) {
        match driver.recv(POLL_INTERVAL) {
            Ok(Some((intf, frame))) => {
                let injected = shared
                    .last_injected
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone();
                let Some(injected) = injected else { continue };
                match wire::parse(&frame, intf, &injected) {
                    Ok(Some(pkt)) => {
                        let mut guard = shared
                            .recv_pkts
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                        guard.push(pkt);
                        shared.cv.notify_all();
                    }
                    Ok(None) => {}
                    Err(e) => debug!("receive parse: {e}"),
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("receive thread exiting: {e}");
                break;
            }
        }
    }
}

/// Collector thread: watch the kernel drop monitor and publish drop
/// timestamps.
fn listen_drops(mon: &DropMon, shared: &Shared) {
    while !shared.stop_threads.load(Ordering::SeqCst) {
        let ts = mon.drop_ts(POLL_INTERVAL);
        if ts != 0 {
            shared.drop_ts.store(ts, Ordering::SeqCst);
            shared.cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::proto::ProtoState;

    fn pkt(src: &str, sp: u16, dst: &str, dp: u16, seq: u32, ack: u32) -> Packet {
        Packet {
            ingress_intf: None,
            src_ip: src.parse().unwrap(),
            dst_ip: dst.parse().unwrap(),
            src_port: sp,
            dst_port: dp,
            seq,
            ack,
            proto_state: ProtoState::TcpL7Rep,
            payload: None,
        }
    }

    fn bare_emulation() -> Emulation {
        Emulation::stub(NodeIndex::new(0))
    }

    #[test]
    fn offsets_learned_from_first_deviation_and_reapplied() {
        let mut emu = bare_emulation();
        // the model sent a request to 192.168.2.5:80 with ack 5000
        let injected = pkt("10.0.0.5", 49152, "192.168.2.5", 80, 100, 5000);
        // the appliance's reply comes back from port 8080 with seq 7000
        let mut recv = vec![pkt("192.168.2.5", 8080, "10.0.0.5", 49152, 7000, 101)];
        emu.update_offsets(&mut recv, &injected);

        // normalised back into the model's view
        assert_eq!(recv[0].src_port, 80);
        assert_eq!(recv[0].seq, 5000);

        // transmitting toward that endpoint undoes the normalisation
        let mut out = pkt("10.0.0.5", 49152, "192.168.2.5", 80, 5000, 7100);
        emu.apply_offsets(&mut out);
        assert_eq!(out.dst_port, 8080);

        // second reply with the same real values maps to the same model view
        let mut recv2 = vec![pkt("192.168.2.5", 8080, "10.0.0.5", 49152, 7000, 101)];
        emu.update_offsets(&mut recv2, &injected);
        assert_eq!(recv2[0].src_port, 80);
        assert_eq!(recv2[0].seq, 5000);
    }

    #[test]
    fn rewind_to_the_same_history_replays_nothing() {
        use net::hist::NodePacketHistory;
        use storage::Interner;

        let mut pkts: Interner<Packet> = Interner::new();
        let mut hists: Interner<NodePacketHistory> = Interner::new();
        let h1 = hists.intern(NodePacketHistory::new(
            pkts.intern(pkt("1.1.1.1", 1, "2.2.2.2", 2, 0, 0)),
            None,
        ));
        let h2 = hists.intern(NodePacketHistory::new(
            pkts.intern(pkt("1.1.1.1", 1, "2.2.2.2", 2, 1, 0)),
            Some(h1.clone()),
        ));

        let mut emu = bare_emulation();
        let timeout = Duration::from_millis(10);

        // empty to empty
        assert_eq!(emu.rewind(None, timeout).unwrap(), 0);

        // the resident history already extends the target: sufficient as is
        emu.set_node_pkt_hist(Some(h2.clone()));
        assert_eq!(emu.rewind(Some(&h1), timeout).unwrap(), 0);
        assert!(emu.node_pkt_hist().unwrap().ptr_eq(&h1));

        // rewinding again to the same history is a no-op
        assert_eq!(emu.rewind(Some(&h1), timeout).unwrap(), 0);
    }

    #[test]
    fn unrelated_packets_keep_their_values() {
        let mut emu = bare_emulation();
        let injected = pkt("10.0.0.5", 49152, "192.168.2.5", 80, 100, 5000);
        // forwarded onward, not a reply to the sender
        let mut recv = vec![pkt("10.0.0.5", 49152, "192.168.2.9", 80, 100, 5000)];
        emu.update_offsets(&mut recv, &injected);
        assert_eq!(recv[0].src_port, 49152);
        assert_eq!(recv[0].seq, 100);
    }
}
