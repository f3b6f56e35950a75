// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Link and pipeline parameters.
//!
//! The user-facing [`CxlParams`] are expressed in nanoseconds and bytes. They
//! are converted once into [`LinkTiming`], which holds every delay in ticks
//! and the bus bandwidth model, before the simulation starts.

use serde::{Deserialize, Serialize};

use crate::sim_error;
use crate::types::{SimError, Tick};

/// Physical and pipeline parameters of the CXL link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CxlParams {
    /// Per-lane bandwidth in bytes per second.
    pub spec_bandwidth: i64,
    pub bytes_per_slot: i64,
    pub slots_per_flit: i64,
    pub bytes_per_flit: i64,
    pub ticks_per_ns: i64,
    /// Ticks per trace instruction (the trace gap unit).
    pub ticks_per_ins: i64,
    /// Number of lanes.
    pub link_width: i64,

    /// Time for a flit to travel the bus.
    pub bus_latency_ns: i64,
    pub delay_tx_buf_to_bus_ns: i64,
    pub delay_rx_buf_to_unpack_ns: i64,
    pub delay_vc_to_pack_ns: i64,
    pub delay_vc_to_memory_ns: i64,
    pub delay_vc_to_retire_ns: i64,
    pub delay_noc_switch_ns: i64,
    pub delay_port_switch_ns: i64,

    /// Period of the memory model clock.
    pub memory_update_period_ns: f64,

    /// Ticks a partially filled host flit waits for more messages.
    pub host_packer_wait_ticks: i64,

    /// Time a partially filled device flit waits for more messages.
    pub device_packer_wait_ns: f64,
}

impl Default for CxlParams {
    fn default() -> Self {
        Self {
            spec_bandwidth: 4 << 30,
            bytes_per_slot: 16,
            slots_per_flit: 4,
            bytes_per_flit: 68,
            ticks_per_ns: 10,
            ticks_per_ins: 10,
            link_width: 16,
            bus_latency_ns: 15,
            delay_tx_buf_to_bus_ns: 11,
            delay_rx_buf_to_unpack_ns: 11,
            delay_vc_to_pack_ns: 2,
            delay_vc_to_memory_ns: 2,
            delay_vc_to_retire_ns: 2,
            delay_noc_switch_ns: 10,
            delay_port_switch_ns: 13,
            // 3200 MT/s
            memory_update_period_ns: 0.625,
            host_packer_wait_ticks: 10,
            device_packer_wait_ns: 0.1,
        }
    }
}

/// Every delay of the link in ticks, derived from [`CxlParams`].
#[derive(Clone, Debug, PartialEq)]
pub struct LinkTiming {
    pub ticks_per_ns: Tick,
    pub ticks_per_ins: Tick,

    /// Link bandwidth in bytes per second.
    pub link_bandwidth_s: i64,

    /// Link bandwidth in bytes per tick.
    pub link_bandwidth: i64,

    /// Number of flits in flight on one bus.
    pub bus_size: usize,
    pub bus_latency: Tick,

    /// Minimum spacing between two flits leaving a bus or transmitter.
    pub ticks_per_dequeue: Tick,

    pub delay_tx_buf_to_bus: Tick,
    pub delay_rx_buf_to_unpack: Tick,
    pub delay_vc_to_pack: Tick,
    pub delay_vc_to_memory: Tick,
    pub delay_vc_to_retire: Tick,
    pub delay_noc_switch: Tick,
    pub delay_port_switch: Tick,
    pub delay_memory_update: Tick,

    pub host_packer_wait: Tick,
    pub device_packer_wait: Tick,
}

impl CxlParams {
    /// Convert to tick-based timing.
    ///
    /// Conversions truncate towards zero. A configuration that would produce
    /// a zero-sized bus, an unbounded bandwidth or a zero memory clock period
    /// is rejected.
    pub fn timing(&self) -> Result<LinkTiming, SimError> {
        if self.ticks_per_ns <= 0 {
            return sim_error!("ticks_per_ns must be positive (got {})", self.ticks_per_ns);
        }
        if self.bytes_per_flit <= 0 || self.link_width <= 0 || self.spec_bandwidth <= 0 {
            return sim_error!("Link bandwidth parameters must be positive");
        }

        let link_bandwidth_s = self.spec_bandwidth * self.link_width;
        let link_bandwidth = link_bandwidth_s * self.ticks_per_ns / 1_000_000_000;

        let flits_per_ns = link_bandwidth_s as f64 / self.bytes_per_flit as f64 * 1e-9;
        let bus_size = (flits_per_ns * self.bus_latency_ns as f64) as usize;
        let ticks_per_dequeue = (1.0 / (flits_per_ns / self.ticks_per_ns as f64)) as Tick;
        let delay_memory_update = (self.memory_update_period_ns * self.ticks_per_ns as f64) as Tick;

        if bus_size == 0 {
            return sim_error!("Bus of {}ns holds no flits", self.bus_latency_ns);
        }
        if ticks_per_dequeue == 0 {
            return sim_error!("Link bandwidth exceeds one flit per tick");
        }
        if delay_memory_update == 0 {
            return sim_error!(
                "Memory update period {}ns is shorter than a tick",
                self.memory_update_period_ns
            );
        }

        let ticks = |ns: i64| ns * self.ticks_per_ns;
        Ok(LinkTiming {
            ticks_per_ns: self.ticks_per_ns,
            ticks_per_ins: self.ticks_per_ins,
            link_bandwidth_s,
            link_bandwidth,
            bus_size,
            bus_latency: ticks(self.bus_latency_ns),
            ticks_per_dequeue,
            delay_tx_buf_to_bus: ticks(self.delay_tx_buf_to_bus_ns),
            delay_rx_buf_to_unpack: ticks(self.delay_rx_buf_to_unpack_ns),
            delay_vc_to_pack: ticks(self.delay_vc_to_pack_ns),
            delay_vc_to_memory: ticks(self.delay_vc_to_memory_ns),
            delay_vc_to_retire: ticks(self.delay_vc_to_retire_ns),
            delay_noc_switch: ticks(self.delay_noc_switch_ns),
            delay_port_switch: ticks(self.delay_port_switch_ns),
            delay_memory_update,
            host_packer_wait: self.host_packer_wait_ticks,
            device_packer_wait: (self.device_packer_wait_ns * self.ticks_per_ns as f64) as Tick,
        })
    }
}
