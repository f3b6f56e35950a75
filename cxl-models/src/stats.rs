// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Latency statistics gathered as requests complete.
//!
//! Requests are grouped by table id (see
//! [`Message::table_id`](cxl_protocols::message::Message::table_id)) and
//! each group keeps running averages so that nothing is stored per request.

use std::collections::BTreeMap;
use std::fmt;

/// A running mean.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningAverage {
    pub count: u64,
    pub mean: f64,
}

impl RunningAverage {
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }
}

/// Latencies of requests that went over the link.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CxlLatency {
    /// From creation to retirement at the host.
    pub end_to_end: RunningAverage,
    /// From packing at the host to reception at the device.
    pub link: RunningAverage,
    /// Time spent in the device memory.
    pub memory: RunningAverage,
}

impl CxlLatency {
    pub fn add(&mut self, end_to_end: i64, link: i64, memory: i64) {
        self.end_to_end.add(end_to_end as f64);
        self.link.add(link as f64);
        self.memory.add(memory as f64);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.end_to_end.count
    }
}

pub type CxlLatencyTable = BTreeMap<u64, CxlLatency>;
pub type DamLatencyTable = BTreeMap<u64, RunningAverage>;

/// Cycles in which an operation had nothing to do.
#[derive(Clone, Debug)]
pub struct OpStats {
    name: &'static str,
    pub empty_cycles: u64,
}

impl OpStats {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            empty_cycles: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for OpStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name, self.empty_cycles)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn running_mean() {
        let mut avg = RunningAverage::default();
        for v in [10.0, 20.0, 60.0] {
            avg.add(v);
        }
        assert_eq!(avg.count, 3);
        assert_relative_eq!(avg.mean, 30.0);
    }

    #[test]
    fn cxl_latency_counts_once() {
        let mut lat = CxlLatency::default();
        lat.add(100, 20, 50);
        lat.add(200, 40, 70);
        assert_eq!(lat.count(), 2);
        assert_relative_eq!(lat.end_to_end.mean, 150.0);
        assert_relative_eq!(lat.link.mean, 30.0);
        assert_relative_eq!(lat.memory.mean, 60.0);
    }
}
