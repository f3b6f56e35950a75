// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Link endpoints: the host and the memory devices.
//!
//! Both kinds of node are built from the same parts: a [packer](packer) that
//! fills flits from the transmit virtual channels, a [`Transmitter`] that
//! moves flits from the tx buffer onto the bus, and an [unpacker](unpacker)
//! that empties received flits into the receive virtual channels. Each
//! operation has a predicate saying whether it can be skipped in the current
//! tick; see [`SkipStats::record`].

use std::rc::Rc;

use cxl_components::buffer::Buffer;
use cxl_components::bus::Bus;
use cxl_engine::context::SimContext;
use cxl_engine::sim_assert;
use cxl_engine::types::{SimError, SimResult, Tick};
use cxl_protocols::flit::Flit;
use cxl_protocols::timing::Stage;
use cxl_track::entity::{Entity, GetEntity};
use cxl_track::trace;

use crate::stats::OpStats;

pub mod device;
pub mod host;
pub mod packer;
pub mod unpacker;

use device::Device;
use host::Host;

/// Moves flits from a tx buffer onto the bus at the bus bandwidth.
pub struct Transmitter {
    last_transmit: Tick,
    delay: Tick,
    ticks_per_dequeue: Tick,
    stage: Stage,
}

impl Transmitter {
    /// A flit leaves once it has been in the tx buffer for `delay` ticks.
    /// Transmitted messages are stamped with `stage`.
    #[must_use]
    pub fn new(delay: Tick, ticks_per_dequeue: Tick, stage: Stage) -> Self {
        Self {
            last_transmit: 0,
            delay,
            ticks_per_dequeue,
            stage,
        }
    }

    #[must_use]
    pub fn can_skip(&self, tx: &Buffer<Flit>, bus: &Bus, now: Tick) -> bool {
        bus.is_full()
            || !tx.head_resident_for(now, self.delay, |f| f.timing.created)
            || now - self.last_transmit < self.ticks_per_dequeue
    }

    /// Returns true if a flit was put on the bus.
    pub fn transmit(
        &mut self,
        entity: &Rc<Entity>,
        tx: &mut Buffer<Flit>,
        bus: &mut Bus,
        now: Tick,
    ) -> Result<bool, SimError> {
        if self.can_skip(tx, bus, now) {
            return Ok(false);
        }
        self.last_transmit = now;
        let mut flit = tx.dequeue()?;
        flit.timing.transmitted = now;
        flit.set_time(self.stage, now);
        trace!(entity ; "to bus {}", flit);
        bus.add(flit, now)?;
        Ok(true)
    }
}

/// Skipped-cycle counters of the four operations of a node.
#[derive(Clone, Debug)]
pub struct SkipStats {
    pub packer: OpStats,
    pub transmit: OpStats,
    pub unpacker: OpStats,
    /// Retiring responses (host) or submitting to memory (device).
    pub service: OpStats,
    /// Ticks in which every operation could be skipped.
    pub skippable: u64,
}

impl SkipStats {
    #[must_use]
    pub fn new(service: &'static str) -> Self {
        Self {
            packer: OpStats::new("Packer"),
            transmit: OpStats::new("Transmit"),
            unpacker: OpStats::new("Unpacker"),
            service: OpStats::new(service),
            skippable: 0,
        }
    }

    /// Account for one operation in one tick.
    ///
    /// `skip` is what the operation's predicate said and `did_work` what the
    /// operation returned (false when it was not run). A predicate must never
    /// claim an operation can be skipped when it would have done work.
    pub fn record(op: &mut OpStats, skip: bool, did_work: bool) -> SimResult {
        if skip {
            op.empty_cycles += 1;
        }
        sim_assert!(!(skip && did_work), "{} flag error", op.name());
        Ok(())
    }

    pub fn ops(&self) -> [&OpStats; 4] {
        [&self.packer, &self.transmit, &self.unpacker, &self.service]
    }
}

/// Run an operation under the skip policy of the context.
///
/// Evaluates to `(skip, did_work)`.
macro_rules! run_op {
    ($ctx:expr, $skip:expr, $op:expr) => {{
        let skip = $skip;
        let did_work = if skip && $ctx.skip_cycle { false } else { $op };
        (skip, did_work)
    }};
}
pub(crate) use run_op;

/// A link endpoint.
pub enum Node {
    Host(Box<Host>),
    Device(Box<Device>),
}

impl Node {
    /// The buffer the bus into this node delivers to.
    pub fn rx_buffer_mut(&mut self) -> &mut Buffer<Flit> {
        match self {
            Node::Host(host) => host.rx_buffer_mut(),
            Node::Device(device) => device.rx_buffer_mut(),
        }
    }

    /// Advance by one tick, sending flits on `bus`.
    pub fn update(&mut self, ctx: &mut SimContext, bus: &mut Bus) -> SimResult {
        match self {
            Node::Host(host) => host.update(ctx, bus),
            Node::Device(device) => device.update(ctx, bus),
        }
    }

    #[must_use]
    pub fn skip_stats(&self) -> &SkipStats {
        match self {
            Node::Host(host) => host.skip_stats(),
            Node::Device(device) => device.skip_stats(),
        }
    }

    #[must_use]
    pub fn as_host(&self) -> Option<&Host> {
        match self {
            Node::Host(host) => Some(host),
            Node::Device(_) => None,
        }
    }

    pub fn as_host_mut(&mut self) -> Option<&mut Host> {
        match self {
            Node::Host(host) => Some(host),
            Node::Device(_) => None,
        }
    }

    #[must_use]
    pub fn as_device(&self) -> Option<&Device> {
        match self {
            Node::Host(_) => None,
            Node::Device(device) => Some(device),
        }
    }

    pub fn as_device_mut(&mut self) -> Option<&mut Device> {
        match self {
            Node::Host(_) => None,
            Node::Device(device) => Some(device),
        }
    }
}

impl GetEntity for Node {
    fn entity(&self) -> &Rc<Entity> {
        match self {
            Node::Host(host) => &host.entity,
            Node::Device(device) => &device.entity,
        }
    }
}
