// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Bounded pool of live emulations, keyed by `(middlebox, history)` so the
//! instance needing the least rewind work is reused.

use crate::emulation::Emulation;
use crate::EmulationError;
use ahash::AHashMap;
use net::hist::{extends, NodePacketHistory};
use net::index::NodeIndex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use storage::Interned;
use tracing::debug;

/// Arena id of a pooled emulation.
pub type EmuId = usize;

/// Ordered key over node packet histories. Chains are compared packet by
/// packet (by interned identity), shorter prefixes first, so scanning
/// backwards from a key yields progressively shorter candidate prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistKey(pub Option<Interned<NodePacketHistory>>);

impl HistKey {
    #[must_use]
    pub fn empty() -> Self {
        Self(None)
    }

    fn chain(&self) -> Vec<usize> {
        self.0
            .as_ref()
            .map(|nph| nph.packets().iter().map(storage::Interned::addr).collect())
            .unwrap_or_default()
    }
}

impl Ord for HistKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.chain();
        let b = other.chain();
        for (x, y) in a.iter().zip(b.iter()) {
            match x.cmp(y) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        a.len().cmp(&b.len())
    }
}

impl PartialOrd for HistKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct EmulationMgr {
    max_emulations: usize,
    emus: Vec<Option<Emulation>>,
    /// `middlebox -> history -> resident instances`
    mb_emu_map: AHashMap<NodeIndex, BTreeMap<HistKey, BTreeSet<EmuId>>>,
    /// The key each live instance is filed under in `mb_emu_map`. Kept here
    /// because rewinds mutate an instance's own history without going
    /// through the manager, so the instance cannot be asked afterwards.
    registered: Vec<Option<HistKey>>,
    /// reuse order for eviction
    lru: VecDeque<EmuId>,
}

impl EmulationMgr {
    #[must_use]
    pub fn new(max_emulations: usize) -> Self {
        Self {
            max_emulations: max_emulations.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn emu(&self, id: EmuId) -> &Emulation {
        self.emus[id].as_ref().unwrap_or_else(|| unreachable!())
    }

    pub fn emu_mut(&mut self, id: EmuId) -> &mut Emulation {
        self.emus[id].as_mut().unwrap_or_else(|| unreachable!())
    }

    /// Find or create an instance for `(mb, nph)`:
    /// 1. an instance whose history already extends `nph` is reused as is;
    /// 2. else the instance with the longest resident prefix of `nph` is
    ///    reused (the caller replays the tail via rewind);
    /// 3. else a new instance is created, evicting the least-recently-used
    ///    instance of another middlebox when the pool is full.
    pub fn get_emulation(
        &mut self,
        mb: NodeIndex,
        nph: &HistKey,
        new_emu: impl FnOnce() -> Result<Emulation, EmulationError>,
    ) -> Result<EmuId, EmulationError> {
        let mut reusable: Option<EmuId> = None;
        if let Some(hist_map) = self.mb_emu_map.get(&mb) {
            // an exact or extending instance needs no replay at all
            for (key, ids) in hist_map {
                let live = ids.iter().copied().find(|id| self.emus[*id].is_some());
                if let Some(id) = live {
                    if key == nph || extends(key.0.as_ref(), nph.0.as_ref()) {
                        reusable = Some(id);
                        break;
                    }
                }
            }
            // otherwise the longest resident prefix of nph
            if reusable.is_none() {
                let mut best: Option<(usize, EmuId)> = None;
                for (key, ids) in hist_map {
                    if extends(nph.0.as_ref(), key.0.as_ref()) {
                        let len = key.0.as_ref().map_or(0, |h| h.len());
                        let live = ids.iter().copied().find(|id| self.emus[*id].is_some());
                        if let Some(id) = live {
                            if best.is_none_or(|(best_len, _)| len > best_len) {
                                best = Some((len, id));
                            }
                        }
                    }
                }
                reusable = best.map(|(_, id)| id);
            }
        }
        if let Some(id) = reusable {
            self.touch(id);
            return Ok(id);
        }

        // create (or recycle) an instance; a new instance starts with the
        // empty history and is filed accordingly
        let id = if self.live_count() < self.max_emulations {
            let id = self.emus.len();
            self.emus.push(Some(new_emu()?));
            self.registered.push(Some(HistKey::empty()));
            id
        } else {
            let id = self.evict(mb)?;
            self.emus[id] = Some(new_emu()?);
            self.registered[id] = Some(HistKey::empty());
            id
        };
        self.mb_emu_map
            .entry(mb)
            .or_default()
            .entry(HistKey::empty())
            .or_default()
            .insert(id);
        self.lru.push_back(id);
        debug!("new emulation {id} for {mb}");
        Ok(id)
    }

    /// Re-key an instance after its history advanced. The bucket it leaves
    /// is the one recorded at registration time, not the instance's own
    /// history, which an intervening rewind may have moved already.
    pub fn update_node_pkt_hist(&mut self, id: EmuId, nph: HistKey) {
        let emu = self.emus[id].as_mut().unwrap_or_else(|| unreachable!());
        let mb = emu.mb();
        emu.set_node_pkt_hist(nph.0.clone());

        let old_key = self.registered[id].take().unwrap_or_else(HistKey::empty);
        if let Some(hist_map) = self.mb_emu_map.get_mut(&mb) {
            if let Some(ids) = hist_map.get_mut(&old_key) {
                ids.remove(&id);
                if ids.is_empty() {
                    hist_map.remove(&old_key);
                }
            }
            hist_map.entry(nph.clone()).or_default().insert(id);
        }
        self.registered[id] = Some(nph);
    }

    pub fn teardown_all(&mut self) {
        for slot in &mut self.emus {
            if let Some(emu) = slot {
                emu.teardown();
            }
            *slot = None;
        }
        for key in &mut self.registered {
            *key = None;
        }
        self.mb_emu_map.clear();
        self.lru.clear();
    }

    fn live_count(&self) -> usize {
        self.emus.iter().filter(|e| e.is_some()).count()
    }

    fn touch(&mut self, id: EmuId) {
        if let Some(pos) = self.lru.iter().position(|&x| x == id) {
            self.lru.remove(pos);
        }
        self.lru.push_back(id);
    }

    /// Tear down the least-recently-used instance of a middlebox other than
    /// `keep_mb` and free its slot.
    fn evict(&mut self, keep_mb: NodeIndex) -> Result<EmuId, EmulationError> {
        let victim = self
            .lru
            .iter()
            .copied()
            .find(|&id| {
                self.emus[id]
                    .as_ref()
                    .is_some_and(|e| e.mb() != keep_mb)
            })
            .or_else(|| self.lru.front().copied())
            .ok_or(EmulationError::NotInitialised)?;

        if let Some(mut emu) = self.emus[victim].take() {
            let mb = emu.mb();
            emu.teardown();
            let key = self.registered[victim].take().unwrap_or_else(HistKey::empty);
            if let Some(hist_map) = self.mb_emu_map.get_mut(&mb) {
                if let Some(ids) = hist_map.get_mut(&key) {
                    ids.remove(&victim);
                    if ids.is_empty() {
                        hist_map.remove(&key);
                    }
                }
                if hist_map.is_empty() {
                    self.mb_emu_map.remove(&mb);
                }
            }
        }
        if let Some(pos) = self.lru.iter().position(|&x| x == victim) {
            self.lru.remove(pos);
        }
        debug!("evicted emulation {victim}");
        Ok(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::packet::Packet;
    use net::proto::ProtoState;
    use storage::Interner;

    fn hist_key(
        pkts: &mut Interner<Packet>,
        hists: &mut Interner<NodePacketHistory>,
        seq: u32,
    ) -> HistKey {
        let pkt = pkts.intern(Packet {
            ingress_intf: None,
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            src_port: 1,
            dst_port: 2,
            seq,
            ack: 0,
            proto_state: ProtoState::TcpInit1,
            payload: None,
        });
        HistKey(Some(hists.intern(NodePacketHistory::new(pkt, None))))
    }

    /// A rewind moves the instance's own history without telling the
    /// manager; the later re-key must still clear the bucket the instance
    /// was actually filed under.
    #[test]
    fn rekey_clears_the_registered_bucket_after_a_rewind() {
        let mut pkts = Interner::new();
        let mut hists = Interner::new();
        let h1 = hist_key(&mut pkts, &mut hists, 1);

        let mb = NodeIndex::new(0);
        let mut mgr = EmulationMgr::new(1);
        let id = mgr
            .get_emulation(mb, &h1, || Ok(crate::Emulation::stub(mb)))
            .unwrap();

        // the caller rewinds directly, then re-keys through the manager
        mgr.emu_mut(id).set_node_pkt_hist(h1.0.clone());
        mgr.update_node_pkt_hist(id, h1.clone());

        let hist_map = mgr.mb_emu_map.get(&mb).unwrap();
        assert_eq!(hist_map.len(), 1);
        assert!(hist_map.contains_key(&h1));
        assert!(!hist_map.contains_key(&HistKey::empty()));
    }

    /// Eviction pressure must never hand out the id of a freed slot.
    #[test]
    fn eviction_never_returns_a_dead_instance() {
        let mut pkts = Interner::new();
        let mut hists = Interner::new();
        let h1 = hist_key(&mut pkts, &mut hists, 1);

        let mb1 = NodeIndex::new(0);
        let mb2 = NodeIndex::new(1);
        let mut mgr = EmulationMgr::new(1);

        let id1 = mgr
            .get_emulation(mb1, &h1, || Ok(crate::Emulation::stub(mb1)))
            .unwrap();
        mgr.emu_mut(id1).set_node_pkt_hist(h1.0.clone());
        mgr.update_node_pkt_hist(id1, h1);

        // the pool is full; mb2 evicts mb1's instance
        let id2 = mgr
            .get_emulation(mb2, &HistKey::empty(), || Ok(crate::Emulation::stub(mb2)))
            .unwrap();
        assert_eq!(mgr.emu(id2).mb(), mb2);

        // asking for mb1 again must recreate, not return the freed id
        let id3 = mgr
            .get_emulation(mb1, &HistKey::empty(), || Ok(crate::Emulation::stub(mb1)))
            .unwrap();
        assert_eq!(mgr.emu(id3).mb(), mb1);
    }
}
