// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A complete CXL.mem system: one host, its devices, the buses between them
//! and optionally a switch.
//!
//! Components never hold references to each other. Buses live in a single
//! `Vec` and know their destination as a [`BufferRef`]; each node knows the
//! index of the bus it transmits on. One tick of the system updates, in this
//! order:
//!  1. the buses between the host and the switch (or the device when there
//!     is no switch),
//!  2. the switch,
//!  3. the buses between the switch and the devices,
//!  4. the devices,
//!  5. the host, after skipping ahead over any idle period,
//!  6. the host's direct-attached memory on memory clock edges.

use std::rc::Rc;

use cxl_components::buffer::Buffer;
use cxl_components::bus::{Bus, BusRole};
use cxl_engine::context::SimContext;
use cxl_engine::types::{SimError, SimResult, Tick};
use cxl_engine::{sim_assert, sim_error};
use cxl_protocols::flit::Flit;
use cxl_track::entity::{Entity, GetEntity};
use cxl_track::{debug, info};
use serde::{Deserialize, Serialize};

use crate::memory::fixed_latency::{FixedLatencyConfig, FixedLatencyMemory};
use crate::memory::memory_map::{DeviceId, MemoryMap};
use crate::memory::traits::MemoryModel;
use crate::node::Node;
use crate::node::device::{Device, DeviceConfig};
use crate::node::host::{Host, HostConfig};
use crate::switch::{Switch, SwitchConfig};
use crate::trace::TraceSource;

/// Node index of the host.
pub const HOST: usize = 0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub num_devices: usize,
    /// Half-open address range served by each device.
    pub device_intervals: Vec<(u64, u64)>,
    /// Put a switch between the host and the devices. Required for more
    /// than one device.
    pub use_switch: bool,
    /// Half-open address range served by the host's direct-attached memory.
    pub dam_interval: Option<(u64, u64)>,
    /// Keep a record of every flit on every bus. Grows with the run.
    pub record_bus_history: bool,

    pub host: HostConfig,
    pub device: DeviceConfig,
    pub switch: SwitchConfig,
    pub memory: FixedLatencyConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            device_intervals: vec![(0x0b00_0000_0000_0000, 0x0cff_ffff_ffff_ffff)],
            use_switch: false,
            dam_interval: Some((0, 0x0aff_ffff_ffff_ffff)),
            record_bus_history: false,
            host: HostConfig::default(),
            device: DeviceConfig::default(),
            switch: SwitchConfig::default(),
            memory: FixedLatencyConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn validate(&self) -> SimResult {
        sim_assert!(self.num_devices > 0, "A system needs at least one device");
        sim_assert!(
            self.device_intervals.len() == self.num_devices,
            "{} device intervals given for {} devices",
            self.device_intervals.len(),
            self.num_devices
        );
        sim_assert!(
            self.use_switch || self.num_devices == 1,
            "{} devices need a switch",
            self.num_devices
        );
        self.memory_map()?;
        Ok(())
    }

    /// The address map of the devices.
    pub fn memory_map(&self) -> Result<MemoryMap, SimError> {
        let mut map = MemoryMap::new();
        for (d, (start, end)) in self.device_intervals.iter().enumerate() {
            map.insert_interval(*start, *end, DeviceId(d))?;
        }
        Ok(map)
    }
}

/// The buffer a bus delivers into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferRef {
    /// Receive buffer of a node.
    NodeRx(usize),
    SwitchUpstreamRx,
    SwitchDownstreamRx(usize),
}

pub struct BusLink {
    pub bus: Bus,
    pub dest: BufferRef,
}

impl BusLink {
    #[must_use]
    pub fn new(bus: Bus, dest: BufferRef) -> Self {
        Self { bus, dest }
    }
}

/// A node and the index of the bus it transmits on.
struct Attached {
    node: Node,
    tx_bus: usize,
}

pub struct System {
    pub entity: Rc<Entity>,
    buses: Vec<BusLink>,
    host_side: Vec<usize>,
    device_side: Vec<usize>,
    nodes: Vec<Attached>,
    switch: Option<Switch>,
    ticks_skipped: Tick,
    record_bus_history: bool,
}

impl System {
    /// Build the system described by `config`. The host replays `trace`.
    pub fn new(
        ctx: &SimContext,
        config: &SystemConfig,
        trace: Box<dyn TraceSource>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let top = ctx.top();
        let timing = ctx.timing();
        let map = config.memory_map()?;

        let mut host = Host::new(top, "host0", &config.host, timing, map, trace)?;
        if let Some(interval) = config.dam_interval {
            let dam = FixedLatencyMemory::new(&host.entity, "dam", config.memory.clone());
            host.attach_memory(interval, Box::new(dam));
        }

        let mut system = Self {
            entity: top.clone(),
            buses: Vec::new(),
            host_side: Vec::new(),
            device_side: Vec::new(),
            nodes: Vec::new(),
            switch: None,
            ticks_skipped: 0,
            record_bus_history: config.record_bus_history,
        };

        let mut device_config = config.device.clone();
        device_config.num_hosts = 1;
        let mut devices = Vec::with_capacity(config.num_devices);
        for d in 0..config.num_devices {
            let memory_config = config.memory.clone();
            devices.push(Device::new(top, DeviceId(d), &device_config, timing, |parent| {
                Box::new(FixedLatencyMemory::new(parent, "memory", memory_config))
                    as Box<dyn MemoryModel>
            })?);
        }

        if config.use_switch {
            let mut switch = Switch::new(top, &config.switch, timing);

            let to_host = system.add_bus(BusRole::SwitchHost, BufferRef::NodeRx(HOST), true, ctx);
            let from_host = system.add_bus(BusRole::HostSwitch, BufferRef::SwitchUpstreamRx, true, ctx);
            switch.connect_upstream(to_host);
            system.nodes.push(Attached {
                node: Node::Host(Box::new(host)),
                tx_bus: from_host,
            });

            for (d, device) in devices.into_iter().enumerate() {
                let node = system.nodes.len();
                let to_device = system.add_bus(BusRole::SwitchDevice, BufferRef::NodeRx(node), false, ctx);
                let from_device =
                    system.add_bus(BusRole::DeviceSwitch, BufferRef::SwitchDownstreamRx(d), false, ctx);
                switch.connect_downstream(DeviceId(d), to_device, config.device_intervals[d])?;
                system.nodes.push(Attached {
                    node: Node::Device(Box::new(device)),
                    tx_bus: from_device,
                });
            }
            system.switch = Some(switch);
        } else {
            let Some(device) = devices.pop() else {
                return sim_error!("No device to connect");
            };
            let to_device = system.add_bus(BusRole::HostDevice, BufferRef::NodeRx(1), true, ctx);
            let to_host = system.add_bus(BusRole::DeviceHost, BufferRef::NodeRx(HOST), true, ctx);
            system.nodes.push(Attached {
                node: Node::Host(Box::new(host)),
                tx_bus: to_device,
            });
            system.nodes.push(Attached {
                node: Node::Device(Box::new(device)),
                tx_bus: to_host,
            });
        }

        debug!(system.entity ; "{} buses, {} nodes, switch: {}",
            system.buses.len(), system.nodes.len(), system.switch.is_some());
        Ok(system)
    }

    fn add_bus(&mut self, role: BusRole, dest: BufferRef, host_side: bool, ctx: &SimContext) -> usize {
        let index = self.buses.len();
        let mut bus = Bus::new(ctx.top(), &format!("bus{index}"), role, ctx.timing());
        bus.set_record_history(self.record_bus_history);
        self.buses.push(BusLink::new(bus, dest));
        if host_side {
            self.host_side.push(index);
        } else {
            self.device_side.push(index);
        }
        index
    }

    pub fn host(&self) -> Result<&Host, SimError> {
        match self.nodes.get(HOST).and_then(|a| a.node.as_host()) {
            Some(host) => Ok(host),
            None => sim_error!("{}: no host", self.entity),
        }
    }

    pub fn host_mut(&mut self) -> Result<&mut Host, SimError> {
        match self.nodes.get_mut(HOST).and_then(|a| a.node.as_host_mut()) {
            Some(host) => Ok(host),
            None => sim_error!("System has no host"),
        }
    }

    #[must_use]
    pub fn device(&self, device: DeviceId) -> Option<&Device> {
        self.nodes.get(device.0 + 1).and_then(|a| a.node.as_device())
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.nodes.iter().filter_map(|a| a.node.as_device())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|a| &a.node)
    }

    #[must_use]
    pub fn switch(&self) -> Option<&Switch> {
        self.switch.as_ref()
    }

    pub fn buses(&self) -> impl Iterator<Item = &Bus> {
        self.buses.iter().map(|l| &l.bus)
    }

    /// Total ticks jumped over while the host was idle.
    #[must_use]
    pub fn ticks_skipped(&self) -> Tick {
        self.ticks_skipped
    }

    /// Let bus `index` deliver into its destination buffer.
    fn deliver(&mut self, index: usize, now: Tick) -> SimResult {
        let Some(link) = self.buses.get_mut(index) else {
            return sim_error!("{}: no bus {}", self.entity, index);
        };
        let dest: &mut Buffer<Flit> = match link.dest {
            BufferRef::NodeRx(n) => match self.nodes.get_mut(n) {
                Some(attached) => attached.node.rx_buffer_mut(),
                None => return sim_error!("{}: no node {}", self.entity, n),
            },
            BufferRef::SwitchUpstreamRx => match &mut self.switch {
                Some(switch) => switch.upstream_rx_mut(),
                None => return sim_error!("{}: no switch", self.entity),
            },
            BufferRef::SwitchDownstreamRx(d) => match &mut self.switch {
                Some(switch) => switch.downstream_rx_mut(d)?,
                None => return sim_error!("{}: no switch", self.entity),
            },
        };
        link.bus.update(now, dest)?;
        Ok(())
    }

    /// When the host is waiting for its next trace access with nothing in
    /// flight, jump straight to the tick that access is due. The memories
    /// are still clocked on every memory clock edge that is jumped over.
    fn fast_forward(&mut self, ctx: &mut SimContext) -> SimResult {
        if !ctx.skip_cycle {
            return Ok(());
        }
        let Some(target) = self.host()?.idle_until() else {
            return Ok(());
        };
        let before = ctx.now();
        if target <= before {
            return Ok(());
        }

        let period = ctx.timing().delay_memory_update;
        // The DAM is clocked after the host so an edge at `before` is still due
        if before % period == 0 {
            self.host_mut()?.update_dam(before)?;
        }
        let mut edge = (before / period + 1) * period;
        while edge <= target {
            // The DAM is clocked at the target tick by the normal update
            if edge != target {
                self.host_mut()?.update_dam(edge)?;
            }
            for attached in &mut self.nodes {
                if let Some(device) = attached.node.as_device_mut() {
                    device.update_memory(edge)?;
                }
            }
            edge += period;
        }

        debug!(self.entity ; "idle from {} to {}", before, target);
        ctx.advance_to(target)?;
        self.ticks_skipped += target - before;
        Ok(())
    }

    fn update_all(&mut self, ctx: &mut SimContext) -> SimResult {
        let now = ctx.now();
        for i in 0..self.host_side.len() {
            let index = self.host_side[i];
            self.deliver(index, now)?;
        }
        if let Some(switch) = &mut self.switch {
            switch.update(ctx, &mut self.buses)?;
        }
        for i in 0..self.device_side.len() {
            let index = self.device_side[i];
            self.deliver(index, now)?;
        }

        for attached in &mut self.nodes {
            if attached.node.as_device().is_some() {
                let Some(link) = self.buses.get_mut(attached.tx_bus) else {
                    return sim_error!("{}: no bus {}", self.entity, attached.tx_bus);
                };
                attached.node.update(ctx, &mut link.bus)?;
            }
        }

        self.fast_forward(ctx)?;
        let Some(attached) = self.nodes.get_mut(HOST) else {
            return sim_error!("{}: no host", self.entity);
        };
        let Some(link) = self.buses.get_mut(attached.tx_bus) else {
            return sim_error!("{}: no bus {}", self.entity, attached.tx_bus);
        };
        attached.node.update(ctx, &mut link.bus)?;

        if ctx.is_memory_tick() {
            let now = ctx.now();
            self.host_mut()?.update_dam(now)?;
        }
        Ok(())
    }

    /// Run one tick. Errors are annotated with the tick they occurred on.
    pub fn update(&mut self, ctx: &mut SimContext) -> SimResult {
        self.update_all(ctx).map_err(|e| e.at_tick(ctx.now()))
    }

    /// Run until the host has completed `expected` requests and has nothing
    /// outstanding. Reaching `tick_limit` first is reported as a deadlock.
    pub fn run_until_complete(
        &mut self,
        ctx: &mut SimContext,
        expected: u64,
        tick_limit: Option<Tick>,
    ) -> SimResult {
        loop {
            self.update(ctx)?;
            ctx.advance();
            let host = self.host()?;
            if host.is_complete(expected) {
                info!(self.entity ; "{} requests completed at tick {}", host.num_completed(), ctx.now());
                return Ok(());
            }
            if tick_limit.is_some_and(|limit| ctx.now() >= limit) {
                return sim_error!(
                    "Deadlock: {} of {} requests completed, {} outstanding @{}",
                    host.num_completed(),
                    expected,
                    host.num_outstanding(),
                    ctx.now()
                );
            }
        }
    }

    /// Log the end-of-run summary.
    pub fn log_summary(&self, ctx: &SimContext) -> SimResult {
        let host = self.host()?;
        let checks = host.credit_checks();
        info!(self.entity ; "Simulation ended at tick {} ({} ticks skipped while idle)",
            ctx.now(), self.ticks_skipped);
        info!(self.entity ; "Completed {} requests ({} served by the DAM)",
            host.num_completed(), host.num_dam_completed());
        info!(self.entity ; "Read credit checks: {} total, {} without host credit, {} without device credit",
            checks.total, checks.int_rejects, checks.ext_rejects);
        for node in self.nodes() {
            let stats = node.skip_stats();
            let ops: Vec<String> = stats.ops().iter().map(|op| op.to_string()).collect();
            info!(node.entity() ; "skipped cycles: {}, skippable {}", ops.join(", "), stats.skippable);
        }
        for device in self.devices() {
            info!(device.entity ; "{} requests sent to memory, {} flits packed",
                device.num_reqs(), device.num_flits_packed());
        }
        if let Some(switch) = &self.switch {
            info!(switch.entity ; "{} flits forwarded to the host", switch.num_forwarded());
        }
        Ok(())
    }
}

impl GetEntity for System {
    fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }
}
