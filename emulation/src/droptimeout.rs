// SPDX-License-Identifier: Apache-2.0
// Copyright SymNet Authors

//! Adaptive injection timeout.
//!
//! How long to wait before declaring a packet dropped is estimated from the
//! observed injection latencies: the initial estimate is the latency average
//! plus a mean-deviation term, scaled up with the number of parallel
//! verification tasks sharing the machine; afterwards the estimate tracks
//! each received packet with an EWMA in the style of RTT estimators.

use stats::Stats;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DropTimeout {
    lat_avg: Duration,
    lat_mdev: Duration,
    mdev_scalar: u32,
    timeout: Duration,
    has_estimate: bool,
}

impl Default for DropTimeout {
    fn default() -> Self {
        Self {
            lat_avg: Duration::from_millis(5),
            lat_mdev: Duration::from_millis(1),
            mdev_scalar: 4,
            // conservative default until an estimate exists
            timeout: Duration::from_millis(1000),
            has_estimate: false,
        }
    }
}

impl DropTimeout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn has_estimate(&self) -> bool {
        self.has_estimate
    }

    /// Derive the initial average and mean deviation from the latencies
    /// recorded so far, then drop those samples.
    pub fn set_initial_latency_estimate(&mut self, stats: &mut Stats) {
        let latencies = stats.pkt_latencies();
        if latencies.is_empty() {
            return;
        }

        let avg_us: u64 = latencies
            .iter()
            .map(|(_, lat)| lat.as_micros() as u64)
            .sum::<u64>()
            / latencies.len() as u64;
        let mdev_us: u64 = latencies
            .iter()
            .map(|(_, lat)| (lat.as_micros() as i64 - avg_us as i64).unsigned_abs())
            .sum::<u64>()
            / latencies.len() as u64;

        self.lat_avg = Duration::from_micros(avg_us);
        self.lat_mdev = Duration::from_micros(mdev_us);
        self.has_estimate = true;
        stats.clear_latencies();
    }

    /// Scale the timeout for `ntasks` concurrent workers.
    pub fn adjust_by_ntasks(&mut self, ntasks: usize) {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        let load = ntasks as f64 / cores as f64;
        self.mdev_scalar = ((ntasks as f64).sqrt() * 2.0 * load).ceil().max(4.0) as u32;
        self.timeout = self.lat_avg * ntasks as u32 + self.lat_mdev * self.mdev_scalar;
    }

    /// Track the latest observed latency with an EWMA (gain 1/4), like an
    /// RTT estimator.
    pub fn update(&mut self, last_latency: Duration, num_recv_pkts: usize) {
        if num_recv_pkts == 0 {
            return;
        }
        let err_us = last_latency.as_micros() as i64 - self.lat_avg.as_micros() as i64;
        let avg_us = (self.lat_avg.as_micros() as i64 + (err_us >> 2)).max(0) as u64;
        let mdev_us = (self.lat_mdev.as_micros() as i64
            + ((err_us.abs() - self.lat_mdev.as_micros() as i64) >> 2))
            .max(0) as u64;
        self.lat_avg = Duration::from_micros(avg_us);
        self.lat_mdev = Duration::from_micros(mdev_us);
        self.timeout = self.lat_avg + self.lat_mdev * self.mdev_scalar;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_conservative() {
        let dt = DropTimeout::new();
        assert!(!dt.has_estimate());
        assert!(dt.timeout() >= Duration::from_millis(100));
    }

    #[test]
    fn initial_estimate_consumes_samples() {
        let mut stats = Stats::default();
        for _ in 0..4 {
            stats.set_pkt_lat_t1();
            stats.set_pkt_latency();
        }
        let mut dt = DropTimeout::new();
        dt.set_initial_latency_estimate(&mut stats);
        assert!(dt.has_estimate());
        assert!(stats.pkt_latencies().is_empty());
    }

    #[test]
    fn update_tracks_larger_latencies() {
        let mut dt = DropTimeout::new();
        dt.adjust_by_ntasks(1);
        let before = dt.timeout();
        for _ in 0..8 {
            dt.update(Duration::from_millis(200), 1);
        }
        assert!(dt.timeout() > before);
    }

    #[test]
    fn zero_received_packets_do_not_move_the_estimate() {
        let mut dt = DropTimeout::new();
        dt.adjust_by_ntasks(2);
        let before = dt.timeout();
        dt.update(Duration::from_secs(10), 0);
        assert_eq!(dt.timeout(), before);
    }
}
