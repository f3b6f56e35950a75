// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The host: replays a memory-access trace over the link.
//!
//! Every tick the host
//!  1. releases the next trace access once its gap has elapsed, either to
//!     the direct-attached memory or to the M2S virtual channels,
//!  2. packs M2S requests into flits,
//!  3. transmits flits on the bus,
//!  4. unpacks S2M responses,
//!  5. retires responses, returning their receive credits.
//!
//! The host owns the credits for its receive channels (`int`) and keeps the
//! credits granted by each device (`ext`). A read reserves a DRS entry and a
//! write reserves an NDR entry when it is packed; the reservation is
//! advertised to the device in the header of the flit that carries it.

use std::collections::BTreeMap;
use std::rc::Rc;

use cxl_components::arbiter::{Class, ClassArbiter, LaneCursor, TokenPolicy};
use cxl_components::buffer::Buffer;
use cxl_components::bus::Bus;
use cxl_components::virtual_channel::VirtualChannel;
use cxl_engine::context::SimContext;
use cxl_engine::params::LinkTiming;
use cxl_engine::types::{SimError, SimResult, Tick};
use cxl_engine::{sim_assert, sim_error};
use cxl_protocols::credits::Credits;
use cxl_protocols::flit::{Flit, SlotKind};
use cxl_protocols::message::{Message, Opcode};
use cxl_protocols::timing::Stage;
use cxl_track::entity::{Entity, GetEntity};
use cxl_track::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryRequest;
use crate::memory::memory_map::{DeviceId, MemoryMap};
use crate::memory::traits::MemoryModel;
use crate::node::packer::{Candidate, PackSource, Packer};
use crate::node::unpacker::{UnpackSink, Unpacker};
use crate::node::{SkipStats, Transmitter, run_op};
use crate::stats::{CxlLatencyTable, DamLatencyTable};
use crate::trace::TraceSource;

/// Number of lanes in each transmit virtual channel.
pub const NUM_TX_LANES: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Entries in each transmit virtual channel, shared over its lanes.
    pub vc_size: usize,
    /// Entries in each receive virtual channel.
    pub rx_vc_size: usize,
    /// Flits in each of the tx and rx buffers.
    pub buffer_size: usize,
    /// Trace accesses read ahead of their release.
    pub trace_buffer_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            vc_size: 1024,
            rx_vc_size: 1024,
            buffer_size: 2048,
            trace_buffer_size: 20,
        }
    }
}

/// Outcome of the credit checks made on read requests while packing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CreditCheckStats {
    pub total: u64,
    /// Checks that found no internal (DRS) credit.
    pub int_rejects: u64,
    /// Checks that found no request credit from the device.
    pub ext_rejects: u64,
}

/// Direct-attached memory and the address range it serves.
pub struct DirectAttached {
    /// Half open.
    pub interval: (u64, u64),
    pub memory: Box<dyn MemoryModel>,
}

impl DirectAttached {
    fn covers(&self, address: u64) -> bool {
        (self.interval.0..self.interval.1).contains(&address)
    }
}

/// An access read from the trace but not yet released.
struct PendingAccess {
    gap: i64,
    message: Message,
}

/// The virtual channels and credits of the host.
struct HostChannels {
    entity: Rc<Entity>,
    req: VirtualChannel,
    rwd: VirtualChannel,
    ndr: VirtualChannel,
    drs: VirtualChannel,
    int: Credits,
    int_capacity: Credits,
    ext: BTreeMap<DeviceId, Credits>,
    map: MemoryMap,
    device_under_consideration: Option<DeviceId>,
    delay_vc_to_pack: Tick,
    credit_checks: CreditCheckStats,
}

impl HostChannels {
    fn tx_vc(&self, class: Class) -> &VirtualChannel {
        match class {
            Class::Lead => &self.rwd,
            Class::Other => &self.req,
        }
    }

    fn ext_mut(&mut self, device: DeviceId) -> Result<&mut Credits, SimError> {
        match self.ext.get_mut(&device) {
            Some(credits) => Ok(credits),
            None => sim_error!("{}: no credits for {}", self.entity, device),
        }
    }
}

impl PackSource for HostChannels {
    fn start_flit(&mut self, rollover_pending: bool) {
        if !rollover_pending {
            self.device_under_consideration = None;
        }
    }

    fn find(&mut self, class: Class, cursor: &mut LaneCursor, now: Tick) -> Option<Candidate> {
        let delay = self.delay_vc_to_pack;
        let int = self.int;
        let target = self.device_under_consideration;
        let map = &self.map;
        let ext = &self.ext;
        let checks = &mut self.credit_checks;
        let vc = match class {
            Class::Lead => &self.rwd,
            Class::Other => &self.req,
        };

        let lane = vc.scan(cursor, |m| {
            if now - m.timing.created < delay {
                return false;
            }
            let Some(dest) = map.lookup(m.address) else {
                return false;
            };
            if target.is_some_and(|d| d != dest) {
                return false;
            }
            let ext = ext.get(&dest).copied().unwrap_or_default();
            match m.opcode {
                Opcode::Req => {
                    checks.total += 1;
                    if int.data == 0 {
                        checks.int_rejects += 1;
                    }
                    if ext.req == 0 {
                        checks.ext_rejects += 1;
                    }
                    ext.req != 0 && int.data != 0
                }
                Opcode::RwD => ext.data != 0 && int.rsp != 0,
                _ => false,
            }
        })?;

        let head = vc.head(lane)?;
        let opcode = head.opcode;
        if self.device_under_consideration.is_none() {
            self.device_under_consideration = self.map.lookup(head.address);
        }
        Some(Candidate {
            class,
            lane,
            opcode,
        })
    }

    fn take(&mut self, candidate: &Candidate) -> Result<Message, SimError> {
        let message = match candidate.class {
            Class::Lead => self.rwd.dequeue(candidate.lane)?,
            Class::Other => self.req.dequeue(candidate.lane)?,
        };
        let dest = self.map.device_for(message.address)?;
        match message.opcode {
            Opcode::Req => {
                Credits::consume(&mut self.ext_mut(dest)?.req, "req")?;
                Credits::consume(&mut self.int.data, "host data")?;
            }
            Opcode::RwD => {
                Credits::consume(&mut self.ext_mut(dest)?.data, "data")?;
                Credits::consume(&mut self.int.rsp, "host rsp")?;
            }
            op => return sim_error!("{}: illegal {} message in tx channel", self.entity, op),
        }
        Ok(message)
    }

    fn header_credits(&mut self, flit: &Flit) -> Result<Credits, SimError> {
        self.int.check_within(&self.int_capacity, "Host")?;
        Ok(Credits::new(
            0,
            flit.count(SlotKind::M2sRwdHdr) as i64,
            flit.count(SlotKind::M2sReq) as i64,
        ))
    }

    fn flushed(&mut self, _rollover: u32) -> SimResult {
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.req.is_empty() && self.rwd.is_empty()
    }

    fn any_ready(&self, now: Tick) -> bool {
        let ready = |m: &Message| now - m.timing.created >= self.delay_vc_to_pack;
        self.tx_vc(Class::Other).any_head(ready) || self.tx_vc(Class::Lead).any_head(ready)
    }
}

impl UnpackSink for HostChannels {
    fn accept(&mut self, message: Message) -> SimResult {
        match message.opcode {
            Opcode::Ndr => self.ndr.enqueue(message),
            Opcode::Drs => self.drs.enqueue(message),
            op => sim_error!("{}: illegal {} message on rx buffer", self.entity, op),
        }
    }

    fn return_credits(&mut self, flit: &Flit) -> SimResult {
        let mut source = None;
        for message in flit.slots().iter().filter_map(|s| s.message()) {
            let device = self.map.device_for(message.address)?;
            sim_assert!(
                source.is_none_or(|d| d == device),
                "{}: single flit has messages from different devices",
                self.entity
            );
            source = Some(device);
        }
        let Some(device) = source else {
            return sim_error!("{}: received flit #{} is empty", self.entity, flit.flit_id);
        };
        let granted = flit.header.credits;
        let ext = self.ext_mut(device)?;
        ext.req += granted.req;
        ext.data += granted.data;
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.ndr.is_full() && self.drs.is_full()
    }
}

pub struct Host {
    pub entity: Rc<Entity>,
    timing: LinkTiming,
    channels: HostChannels,
    packer: Packer,
    unpacker: Unpacker,
    transmitter: Transmitter,
    tx: Buffer<Flit>,
    rx: Buffer<Flit>,
    retire_arbiter: ClassArbiter,

    trace: Box<dyn TraceSource>,
    trace_buffer: Buffer<PendingAccess>,
    trace_finished: bool,
    last_release: Tick,

    dam: Option<DirectAttached>,
    reqs_in_dam: BTreeMap<u64, Tick>,
    sent_to_device: BTreeMap<u64, Message>,

    num_completed: u64,
    num_dam_completed: u64,
    last_retired: Option<Message>,
    cxl_latency: CxlLatencyTable,
    dam_latency: DamLatencyTable,
    stats: SkipStats,
}

impl Host {
    /// Create a host that reads accesses from `trace` and sends them to the
    /// devices listed in `map`.
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        config: &HostConfig,
        timing: &LinkTiming,
        map: MemoryMap,
        trace: Box<dyn TraceSource>,
    ) -> Result<Self, SimError> {
        sim_assert!(
            config.vc_size >= NUM_TX_LANES,
            "Host virtual channel size {} is smaller than its {} lanes",
            config.vc_size,
            NUM_TX_LANES
        );
        let entity = Rc::new(Entity::new(parent, name));
        let rx_vc = config.rx_vc_size as i64;
        let ext = map
            .regions()
            .map(|r| (r.device, Credits::new(1, 0, 1)))
            .collect();
        let lane_size = config.vc_size / NUM_TX_LANES;
        let channels = HostChannels {
            entity: entity.clone(),
            req: VirtualChannel::new(NUM_TX_LANES, lane_size),
            rwd: VirtualChannel::new(NUM_TX_LANES, lane_size),
            ndr: VirtualChannel::single(config.rx_vc_size),
            drs: VirtualChannel::single(config.rx_vc_size),
            int: Credits::new(0, rx_vc, rx_vc),
            int_capacity: Credits::new(0, rx_vc, rx_vc),
            ext,
            map,
            device_under_consideration: None,
            delay_vc_to_pack: timing.delay_vc_to_pack,
            credit_checks: CreditCheckStats::default(),
        };
        Ok(Self {
            packer: Packer::new(&entity, timing.host_packer_wait, Stage::Packed),
            unpacker: Unpacker::new(&entity, timing.delay_rx_buf_to_unpack, Stage::RespUnpacked),
            transmitter: Transmitter::new(
                timing.delay_tx_buf_to_bus,
                timing.ticks_per_dequeue,
                Stage::Transmitted,
            ),
            entity,
            timing: timing.clone(),
            channels,
            tx: Buffer::new(config.buffer_size),
            rx: Buffer::new(config.buffer_size),
            retire_arbiter: ClassArbiter::new(TokenPolicy::Alternate),
            trace,
            trace_buffer: Buffer::new(config.trace_buffer_size),
            trace_finished: false,
            last_release: 0,
            dam: None,
            reqs_in_dam: BTreeMap::new(),
            sent_to_device: BTreeMap::new(),
            num_completed: 0,
            num_dam_completed: 0,
            last_retired: None,
            cxl_latency: CxlLatencyTable::new(),
            dam_latency: DamLatencyTable::new(),
            stats: SkipStats::new("Complete"),
        })
    }

    /// Serve the half-open address range `interval` from a local memory.
    pub fn attach_memory(&mut self, interval: (u64, u64), memory: Box<dyn MemoryModel>) {
        self.dam = Some(DirectAttached { interval, memory });
    }

    pub fn rx_buffer_mut(&mut self) -> &mut Buffer<Flit> {
        &mut self.rx
    }

    #[must_use]
    pub fn int_credits(&self) -> Credits {
        self.channels.int
    }

    #[must_use]
    pub fn ext_credits(&self, device: DeviceId) -> Option<Credits> {
        self.channels.ext.get(&device).copied()
    }

    #[must_use]
    pub fn credit_checks(&self) -> CreditCheckStats {
        self.channels.credit_checks
    }

    #[must_use]
    pub fn num_completed(&self) -> u64 {
        self.num_completed
    }

    #[must_use]
    pub fn num_dam_completed(&self) -> u64 {
        self.num_dam_completed
    }

    /// The most recently retired response, with its full timing record.
    #[must_use]
    pub fn last_retired(&self) -> Option<&Message> {
        self.last_retired.as_ref()
    }

    #[must_use]
    pub fn num_outstanding(&self) -> usize {
        self.sent_to_device.len() + self.reqs_in_dam.len()
    }

    #[must_use]
    pub fn cxl_latency(&self) -> &CxlLatencyTable {
        &self.cxl_latency
    }

    #[must_use]
    pub fn dam_latency(&self) -> &DamLatencyTable {
        &self.dam_latency
    }

    #[must_use]
    pub fn skip_stats(&self) -> &SkipStats {
        &self.stats
    }

    #[must_use]
    pub fn num_flits_packed(&self) -> u64 {
        self.packer.num_flits()
    }

    /// True once `expected` requests have completed and nothing is pending.
    #[must_use]
    pub fn is_complete(&self, expected: u64) -> bool {
        self.sent_to_device.is_empty()
            && self.reqs_in_dam.is_empty()
            && self.num_completed >= expected
    }

    /// True when no request is anywhere between the host and the memories.
    #[must_use]
    pub fn no_active_transaction(&self) -> bool {
        let ch = &self.channels;
        ch.req.is_empty()
            && ch.rwd.is_empty()
            && ch.ndr.is_empty()
            && ch.drs.is_empty()
            && self.reqs_in_dam.is_empty()
            && self.sent_to_device.is_empty()
    }

    /// When the host is idle, the tick at which the next trace access is
    /// due. Nothing happens anywhere in the system before then.
    #[must_use]
    pub fn idle_until(&self) -> Option<Tick> {
        if !self.no_active_transaction() {
            return None;
        }
        let head = self.trace_buffer.peek()?;
        Some(self.last_release + head.gap * self.timing.ticks_per_ins)
    }

    /// Clock the direct-attached memory and retire what it completed.
    pub fn update_dam(&mut self, now: Tick) -> SimResult {
        let Some(dam) = &mut self.dam else {
            return Ok(());
        };
        dam.memory.tick(now);
        for request in dam.memory.drain_completed() {
            let Some(start) = self.reqs_in_dam.remove(&request.id) else {
                return sim_error!("{}: DAM completed unknown request {}", self.entity, request.id);
            };
            self.num_completed += 1;
            self.num_dam_completed += 1;
            let table = (request.address >> 48) & 0xFFF;
            self.dam_latency
                .entry(table)
                .or_default()
                .add((now - start) as f64);
            trace!(self.entity ; "DAM complete {}", request.id);
        }
        Ok(())
    }

    /// Release the next trace access if it is due and read ahead.
    fn intake(&mut self, ctx: &mut SimContext) -> SimResult {
        let now = ctx.now();
        if let Some(head) = self.trace_buffer.peek() {
            let due = now - self.last_release >= head.gap * self.timing.ticks_per_ins;
            let address = head.message.address;
            let opcode = head.message.opcode;
            if due {
                self.last_release = now;
                match &mut self.dam {
                    Some(dam) if dam.covers(address) => {
                        if !dam.memory.input_queue_full() {
                            let access = self.trace_buffer.dequeue()?;
                            let accepted = dam
                                .memory
                                .submit(MemoryRequest::for_message(&access.message, now));
                            sim_assert!(accepted, "{}: DAM refused a request", self.entity);
                            self.reqs_in_dam.insert(access.message.msg_id, now);
                        }
                    }
                    _ => {
                        self.channels.map.device_for(address)?;
                        let vc = match opcode {
                            Opcode::Req => &mut self.channels.req,
                            Opcode::RwD => &mut self.channels.rwd,
                            op => return sim_error!("Illegal opcode {} in trace", op),
                        };
                        if vc.next_lane_is_full() {
                            // Retry next tick
                            return Ok(());
                        }
                        let mut access = self.trace_buffer.dequeue()?;
                        access.message.timing.created = now;
                        trace!(self.entity ; "issue {}", access.message);
                        vc.enqueue_round_robin(access.message.clone())?;
                        self.sent_to_device
                            .insert(access.message.msg_id, access.message);
                    }
                }
            }
        }

        if !self.trace_finished && !self.trace_buffer.is_full() {
            match self.trace.next_entry()? {
                Some(entry) => {
                    let message = Message::new(ctx.alloc_msg_id(), entry.opcode, entry.address);
                    self.trace_buffer.enqueue(PendingAccess {
                        gap: entry.gap,
                        message,
                    })?;
                }
                None => {
                    debug!(self.entity ; "trace finished");
                    self.trace_finished = true;
                }
            }
        }
        Ok(())
    }

    fn retire_ready(&self, vc: &VirtualChannel, now: Tick) -> bool {
        vc.lane(0)
            .head_resident_for(now, self.timing.delay_vc_to_retire, |m| m.timing.resp_unpacked)
    }

    fn can_skip_retire(&self, now: Tick) -> bool {
        !(self.retire_ready(&self.channels.ndr, now) || self.retire_ready(&self.channels.drs, now))
    }

    /// Retire one response. NDR is the lead class.
    fn retire(&mut self, now: Tick) -> Result<bool, SimError> {
        let delay = self.timing.delay_vc_to_retire;
        let channels = &mut self.channels;
        let response = self.retire_arbiter.arbitrate(|class| {
            let vc = match class {
                Class::Lead => &mut channels.ndr,
                Class::Other => &mut channels.drs,
            };
            if vc
                .lane(0)
                .head_resident_for(now, delay, |m| m.timing.resp_unpacked)
            {
                vc.dequeue(0).map(Some)
            } else {
                Ok(None)
            }
        })?;
        let Some(mut response) = response else {
            return Ok(false);
        };

        response.timing.complete = now;
        if self.sent_to_device.remove(&response.msg_id).is_none() {
            return sim_error!("{}: response {} for unknown request", self.entity, response);
        }
        let t = &response.timing;
        self.cxl_latency.entry(response.table_id()).or_default().add(
            t.complete - t.created,
            t.received - t.packed,
            t.memory_complete - t.at_memory,
        );
        self.num_completed += 1;
        match response.opcode {
            Opcode::Drs => self.channels.int.data += 1,
            Opcode::Ndr => self.channels.int.rsp += 1,
            op => return sim_error!("{}: cannot retire a {} message", self.entity, op),
        }
        debug!(self.entity ; "retired {}", response);
        self.last_retired = Some(response);
        Ok(true)
    }

    /// Advance the host by one tick.
    pub fn update(&mut self, ctx: &mut SimContext, bus: &mut Bus) -> SimResult {
        let now = ctx.now();
        self.intake(ctx)?;

        let (pack_skip, did) = run_op!(
            ctx,
            self.packer.can_skip(&self.channels, now),
            self.packer.pack(&mut self.channels, ctx, &mut self.tx)?
        );
        SkipStats::record(&mut self.stats.packer, pack_skip, did)?;

        let (tx_skip, did) = run_op!(
            ctx,
            self.transmitter.can_skip(&self.tx, bus, now),
            self.transmitter
                .transmit(&self.entity, &mut self.tx, bus, now)?
        );
        SkipStats::record(&mut self.stats.transmit, tx_skip, did)?;

        let (rx_skip, did) = run_op!(
            ctx,
            self.unpacker.can_skip(&self.rx, now),
            self.unpacker.unpack(&mut self.channels, now, &mut self.rx)?
        );
        SkipStats::record(&mut self.stats.unpacker, rx_skip, did)?;

        let (retire_skip, did) = run_op!(ctx, self.can_skip_retire(now), self.retire(now)?);
        SkipStats::record(&mut self.stats.service, retire_skip, did)?;

        if pack_skip && tx_skip && rx_skip && retire_skip {
            self.stats.skippable += 1;
        }
        Ok(())
    }
}

impl GetEntity for Host {
    fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }
}
