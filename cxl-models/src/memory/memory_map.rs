// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Address decoding.
//!
//! Each device serves one contiguous address range. The host uses the map to
//! find which device (and therefore which set of external credits) a request
//! targets and the switch uses it to route flits to a downstream port.

use std::collections::BTreeMap;
use std::fmt;

use cxl_engine::sim_error;
use cxl_engine::types::{SimError, SimResult};

/// Index of a device below the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "device{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct MemoryRegion {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub device: DeviceId,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryMap {
    // Keyed by the first address of each region
    regions: BTreeMap<u64, MemoryRegion>,
}

impl MemoryMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map the half-open interval `[start, end)` to a device.
    pub fn insert_interval(&mut self, start: u64, end: u64, device: DeviceId) -> SimResult {
        if end <= start {
            return sim_error!("Invalid interval [{:#x}, {:#x})", start, end);
        }
        self.insert(start, end - start, device)
    }

    /// Map `[start, start+size-1]` to a device.
    pub fn insert(&mut self, start: u64, size: u64, device: DeviceId) -> SimResult {
        if size == 0 {
            return sim_error!("Invalid region size {size}");
        }
        let end = start + (size - 1);

        let overlaps_prev = self
            .regions
            .range(..=start)
            .next_back()
            .is_some_and(|(_, prev)| prev.end >= start);
        if overlaps_prev {
            return sim_error!("Region overlap at {start:#x}");
        }

        let overlaps_next = self
            .regions
            .range(start..)
            .next()
            .is_some_and(|(_, next)| next.start <= end);
        if overlaps_next {
            return sim_error!("Region overlap at {end:#x}");
        }

        self.regions.insert(start, MemoryRegion { start, end, device });
        Ok(())
    }

    /// The device serving `addr`, if any.
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<DeviceId> {
        let (_, region) = self.regions.range(..=addr).next_back()?;
        (addr <= region.end).then_some(region.device)
    }

    /// As [`MemoryMap::lookup`] but an unmapped address is an error.
    pub fn device_for(&self, addr: u64) -> Result<DeviceId, SimError> {
        match self.lookup(addr) {
            Some(device) => Ok(device),
            None => sim_error!("Invalid address {:#x}", addr),
        }
    }

    #[must_use]
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.values()
    }
}
