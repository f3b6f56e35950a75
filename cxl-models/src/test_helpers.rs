// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::collections::VecDeque;

use cxl_engine::context::SimContext;
use cxl_protocols::message::Opcode;

use crate::system::{System, SystemConfig};
use crate::trace::TraceEntry;

/// Start of the address range of the first device in the default system.
pub const DEVICE0_BASE: u64 = 0x0b00_0000_0000_0000;

#[must_use]
pub fn read_at(address: u64, gap: i64) -> TraceEntry {
    TraceEntry {
        address,
        opcode: Opcode::Req,
        gap,
    }
}

#[must_use]
pub fn write_at(address: u64, gap: i64) -> TraceEntry {
    TraceEntry {
        address,
        opcode: Opcode::RwD,
        gap,
    }
}

/// `count` accesses to consecutive cache lines of device 0, issued
/// back-to-back. `write` picks the opcode of access `i`.
#[must_use]
pub fn device0_stream(count: usize, write: impl Fn(usize) -> bool) -> VecDeque<TraceEntry> {
    (0..count)
        .map(|i| {
            let address = DEVICE0_BASE + (i as u64) * 64;
            if write(i) {
                write_at(address, 0)
            } else {
                read_at(address, 0)
            }
        })
        .collect()
}

/// A default-configured system without a DAM that records bus history.
#[must_use]
pub fn cxl_only_config() -> SystemConfig {
    SystemConfig {
        dam_interval: None,
        record_bus_history: true,
        ..SystemConfig::default()
    }
}

/// A system with `num_devices` devices behind a switch. Each device serves
/// a 1TB range starting at [`DEVICE0_BASE`].
#[must_use]
pub fn switched_config(num_devices: usize) -> SystemConfig {
    let size = 1 << 40;
    SystemConfig {
        num_devices,
        device_intervals: (0..num_devices as u64)
            .map(|d| (DEVICE0_BASE + d * size, DEVICE0_BASE + (d + 1) * size))
            .collect(),
        use_switch: true,
        dam_interval: None,
        record_bus_history: true,
        ..SystemConfig::default()
    }
}

pub fn create_system(ctx: &SimContext, config: &SystemConfig, trace: VecDeque<TraceEntry>) -> System {
    System::new(ctx, config, Box::new(trace)).unwrap()
}
