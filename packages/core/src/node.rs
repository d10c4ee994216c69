//! Node load model (raw counter ingestion and per-period derived rates).
//!
//! Grounded on `balancelogicadapter.NodeStateData`/`NodeState` in
//! `examples/original_source/src/cocaine-app/balancelogicadapter.py`: a node's
//! write/read capacity and free space are derived from monotonic counters
//! sampled at a fixed period, never from instantaneous values.

use serde::{Deserialize, Serialize};

/// One raw sample of a storage node's counters, as reported by the storage
/// daemon. Field names mirror the counters the daemon actually exposes
/// (`DNET_CNTR_BAVAIL`/`BSIZE`/`BLOCKS`, `DU1`/`LA1`); this struct is the one
/// place those wire-level names are allowed to leak into the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawNodeSample {
    /// Blocks available to unprivileged users.
    pub blocks_available: u64,
    /// Block size in bytes.
    pub block_size: u64,
    /// Total blocks on the device.
    pub blocks_total: u64,
    /// Cumulative bytes written since boot.
    pub bytes_written: u64,
    /// Cumulative bytes read since boot.
    pub bytes_read: u64,
    /// `DU1` load-average-like counter, already scaled by 100, if present.
    pub du1: Option<u64>,
    /// `LA1` one-minute load average, already scaled by 100, used when
    /// `du1` is absent.
    pub la1: Option<u64>,
    /// Sample timestamp, seconds since epoch.
    pub timestamp_secs: u64,
}

/// Derived, per-period state of a single node. Holds the previous sample so
/// that counter deltas (and period length) can be computed on the next
/// `observe`.
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    previous: Option<RawNodeSample>,
    /// Bytes written per period, derived from the last two samples.
    pub real_put_per_period: f64,
    /// Bytes read per period, derived from the last two samples.
    pub real_get_per_period: f64,
    /// Theoretical maximum write rate implied by `la`, or `f64::INFINITY`
    /// when `la` is zero (no load observed yet).
    pub max_put_per_period: f64,
    /// Theoretical maximum read rate, same convention as `max_put_per_period`.
    pub max_get_per_period: f64,
    /// Free space in kibibytes.
    pub free_space_kb: f64,
    /// Free space as a fraction of total space, in `[0, 1]`.
    pub free_space_relative: f64,
}

impl NodeState {
    /// Fold a new raw sample into the node's derived state. The first
    /// sample for a node yields zero rates (no delta is available yet);
    /// a counter that goes backwards relative to the previous sample
    /// (daemon restart, counter wrap) resets the rate to zero rather than
    /// producing a negative or inflated delta.
    pub fn observe(&mut self, sample: RawNodeSample) {
        let free_space_kb = (sample.blocks_available * sample.block_size) as f64 / 1024.0;
        let total_kb = (sample.blocks_total * sample.block_size) as f64 / 1024.0;
        self.free_space_kb = free_space_kb;
        self.free_space_relative = if total_kb > 0.0 {
            free_space_kb / total_kb
        } else {
            0.0
        };

        match self.previous {
            Some(prev) if sample.timestamp_secs > prev.timestamp_secs => {
                let dt = (sample.timestamp_secs - prev.timestamp_secs) as f64;
                self.real_put_per_period = rate_or_reset(prev.bytes_written, sample.bytes_written, dt);
                self.real_get_per_period = rate_or_reset(prev.bytes_read, sample.bytes_read, dt);
            }
            _ => {
                self.real_put_per_period = 0.0;
                self.real_get_per_period = 0.0;
            }
        }

        let la = sample.du1.or(sample.la1).unwrap_or(0) as f64 / 100.0;
        self.max_put_per_period = if la > 0.0 { self.real_put_per_period / la } else { f64::INFINITY };
        self.max_get_per_period = if la > 0.0 { self.real_get_per_period / la } else { f64::INFINITY };

        self.previous = Some(sample);
    }

    /// True once at least one sample has been observed.
    pub fn has_sample(&self) -> bool {
        self.previous.is_some()
    }
}

fn rate_or_reset(prev: u64, current: u64, period_secs: f64) -> f64 {
    if current < prev || period_secs <= 0.0 {
        0.0
    } else {
        (current - prev) as f64 / period_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bytes_written: u64, ts: u64) -> RawNodeSample {
        RawNodeSample {
            blocks_available: 1000,
            block_size: 1024,
            blocks_total: 2000,
            bytes_written,
            bytes_read: 0,
            du1: Some(50),
            la1: None,
            timestamp_secs: ts,
        }
    }

    #[test]
    fn first_sample_yields_zero_rate() {
        let mut node = NodeState::default();
        node.observe(sample(1000, 100));
        assert_eq!(node.real_put_per_period, 0.0);
        assert!(node.has_sample());
    }

    #[test]
    fn second_sample_derives_rate_from_delta() {
        let mut node = NodeState::default();
        node.observe(sample(1000, 100));
        node.observe(sample(2000, 110));
        assert_eq!(node.real_put_per_period, 100.0);
    }

    #[test]
    fn counter_regression_resets_to_zero() {
        let mut node = NodeState::default();
        node.observe(sample(5000, 100));
        node.observe(sample(1000, 110));
        assert_eq!(node.real_put_per_period, 0.0);
    }

    #[test]
    fn zero_la_yields_infinite_capacity() {
        let mut node = NodeState::default();
        let mut s = sample(1000, 100);
        s.du1 = Some(0);
        node.observe(s);
        assert!(node.max_put_per_period.is_infinite());
    }

    #[test]
    fn la1_used_when_du1_absent() {
        let mut node = NodeState::default();
        let mut first = sample(1000, 100);
        first.du1 = None;
        first.la1 = Some(200);
        node.observe(first);

        let mut second = sample(2000, 110);
        second.du1 = None;
        second.la1 = Some(200);
        node.observe(second);
        // real_put_per_period = (2000-1000)/10 = 100.0, la = 2.0
        assert_eq!(node.max_put_per_period, 100.0 / 2.0);
    }

    #[test]
    fn max_put_per_period_tracks_observed_write_rate() {
        let mut node = NodeState::default();
        node.observe(sample(1000, 100));
        assert_eq!(node.max_put_per_period, 0.0);
        node.observe(sample(6000, 150));
        // real_put_per_period = (6000-1000)/50 = 100.0, la = 0.5
        assert_eq!(node.max_put_per_period, 100.0 / 0.5);
    }
}
