// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Per-worker latency bookkeeping and CSV output.
//!
//! Each verification worker records the overall verification time, every
//! packet-injection latency, every rewind (with its injection count), and the
//! kernel drop-detection latencies. The collected figures are written as
//! `<pid>.stats.csv` in the output directory when the worker finishes.

use chrono::Utc;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct Stats {
    verify_started: Option<Instant>,
    verify_duration: Option<Duration>,

    pkt_lat_t1: Option<Instant>,
    /// `(unix timestamp of t1 in usec, latency)` per injected packet.
    pkt_latencies: Vec<(i64, Duration)>,

    rewind_started: Option<Instant>,
    /// `(latency, replayed injections)` per rewind.
    rewind_latencies: Vec<(Duration, usize)>,

    /// Kernel-reported drop latencies.
    drop_latencies: Vec<Duration>,
}

static STATS: OnceLock<Mutex<Stats>> = OnceLock::new();

impl Stats {
    /// The process-wide instance. Each forked worker starts from the parent's
    /// (empty) copy and owns it exclusively.
    pub fn get() -> MutexGuard<'static, Stats> {
        STATS
            .get_or_init(|| Mutex::new(Stats::default()))
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn reset(&mut self) {
        *self = Stats::default();
    }

    pub fn start_verification(&mut self) {
        self.verify_started = Some(Instant::now());
    }

    pub fn stop_verification(&mut self) {
        if let Some(t0) = self.verify_started.take() {
            self.verify_duration = Some(t0.elapsed());
        }
    }

    /// Mark the moment a packet is handed to the driver.
    pub fn set_pkt_lat_t1(&mut self) {
        self.pkt_lat_t1 = Some(Instant::now());
    }

    /// Record the latency from the matching `set_pkt_lat_t1` to now.
    pub fn set_pkt_latency(&mut self) {
        if let Some(t1) = self.pkt_lat_t1.take() {
            self.pkt_latencies
                .push((Utc::now().timestamp_micros(), t1.elapsed()));
        }
    }

    #[must_use]
    pub fn pkt_latencies(&self) -> &[(i64, Duration)] {
        &self.pkt_latencies
    }

    pub fn clear_latencies(&mut self) {
        self.pkt_latencies.clear();
    }

    pub fn start_rewind(&mut self) {
        self.rewind_started = Some(Instant::now());
    }

    pub fn stop_rewind(&mut self, injections: usize) {
        if let Some(t0) = self.rewind_started.take() {
            self.rewind_latencies.push((t0.elapsed(), injections));
        }
    }

    pub fn record_drop_latency(&mut self, latency: Duration) {
        self.drop_latencies.push(latency);
    }

    #[must_use]
    pub fn total_rewind_injections(&self) -> usize {
        self.rewind_latencies.iter().map(|(_, n)| n).sum()
    }

    /// Write `<pid>.stats.csv` under `out_dir`.
    pub fn write_csv(&self, out_dir: &Path, pid: i32) -> Result<(), StatsError> {
        let path = out_dir.join(format!("{pid}.stats.csv"));
        let mut file = fs::File::create(&path)?;

        writeln!(
            file,
            "overall_lat(us),rewind_lat(us),rewind_injections,pkt_lat(us),drop_lat(us)"
        )?;
        let overall = self
            .verify_duration
            .map_or(0, |d| d.as_micros() as u64);
        let rewind_total: u64 = self
            .rewind_latencies
            .iter()
            .map(|(d, _)| d.as_micros() as u64)
            .sum();
        let pkt_total: u64 = self
            .pkt_latencies
            .iter()
            .map(|(_, d)| d.as_micros() as u64)
            .sum();
        let drop_total: u64 = self.drop_latencies.iter().map(|d| d.as_micros() as u64).sum();
        writeln!(
            file,
            "{},{},{},{},{}",
            overall,
            rewind_total,
            self.total_rewind_injections(),
            pkt_total,
            drop_total
        )?;

        // one row per injection for latency distributions
        writeln!(file, "pkt_t1(us),pkt_lat(us)")?;
        for (t1, lat) in &self.pkt_latencies {
            writeln!(file, "{},{}", t1, lat.as_micros())?;
        }

        debug!("stats written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_recording_pairs_t1_with_completion() {
        let mut stats = Stats::default();
        stats.set_pkt_latency(); // no matching t1, ignored
        assert!(stats.pkt_latencies().is_empty());

        stats.set_pkt_lat_t1();
        stats.set_pkt_latency();
        assert_eq!(stats.pkt_latencies().len(), 1);
    }

    #[test]
    fn drop_latencies_feed_the_drop_column() {
        let mut stats = Stats::default();
        stats.record_drop_latency(Duration::from_micros(5));
        stats.record_drop_latency(Duration::from_micros(7));
        assert_eq!(stats.drop_latencies.len(), 2);

        let dir = std::env::temp_dir().join("symnet-stats-drop-test");
        std::fs::create_dir_all(&dir).unwrap();
        stats.write_csv(&dir, 4243).unwrap();
        let content = std::fs::read_to_string(dir.join("4243.stats.csv")).unwrap();
        // second line is the totals row; the drop column is its last field
        let totals = content.lines().nth(1).unwrap();
        assert!(totals.ends_with(",12"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rewind_totals_accumulate() {
        let mut stats = Stats::default();
        stats.start_rewind();
        stats.stop_rewind(3);
        stats.start_rewind();
        stats.stop_rewind(2);
        assert_eq!(stats.total_rewind_injections(), 5);
    }

    #[test]
    fn csv_is_written() {
        let mut stats = Stats::default();
        stats.start_verification();
        stats.set_pkt_lat_t1();
        stats.set_pkt_latency();
        stats.stop_verification();

        let dir = std::env::temp_dir().join("symnet-stats-test");
        std::fs::create_dir_all(&dir).unwrap();
        stats.write_csv(&dir, 4242).unwrap();
        let content = std::fs::read_to_string(dir.join("4242.stats.csv")).unwrap();
        assert!(content.starts_with("overall_lat(us)"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
