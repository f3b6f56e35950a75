// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A CXL memory device.
//!
//! The device unpacks M2S requests, hands them to its memory model and packs
//! the responses the memory produces back into flits for the host.
//!
//! The device owns the credits for its M2S receive channels. They are
//! granted to the host in the header of every flit the device sends and
//! come back as the requests leave the channels: a read frees its request
//! credit when it is submitted to memory, a write frees its data credit when
//! its NDR is packed.

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
use cxl_protocols::flit::Flit;
use cxl_protocols::message::{Message, Opcode};
use cxl_protocols::timing::Stage;
use cxl_track::entity::{Entity, GetEntity};
use cxl_track::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryRequest;
use crate::memory::memory_map::DeviceId;
use crate::memory::traits::MemoryModel;
use crate::node::packer::{Candidate, PackSource, Packer};
use crate::node::unpacker::{UnpackSink, Unpacker};
use crate::node::{SkipStats, Transmitter, run_op};

/// Number of lanes in each transmit virtual channel.
pub const NUM_TX_LANES: usize = 4;

/// Consecutive flits that may end with data still to send.
pub const SEQ_THRESHOLD: u32 = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Entries in each virtual channel.
    pub vc_size: usize,
    /// Flits in each of the tx and rx buffers.
    pub buffer_size: usize,
    /// Hosts sharing the device credits.
    pub num_hosts: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vc_size: 1024,
            buffer_size: 2048,
            num_hosts: 1,
        }
    }
}

/// The virtual channels and credits of a device.
struct DeviceChannels {
    entity: Rc<Entity>,
    req: VirtualChannel,
    rwd: VirtualChannel,
    ndr: VirtualChannel,
    drs: VirtualChannel,
    int: Credits,
    int_capacity: Credits,
    ext: Credits,
    num_hosts: i64,
    seq_length: u32,
    delay_vc_to_pack: Tick,
}

impl DeviceChannels {
    /// Share of `available` credits granted to one host.
    fn grant(available: i64, num_hosts: i64) -> i64 {
        match available {
            1 => 1,
            n if n > 1 => n / num_hosts,
            _ => 0,
        }
    }
}

impl PackSource for DeviceChannels {
    fn start_flit(&mut self, _rollover_pending: bool) {}

    fn find(&mut self, class: Class, cursor: &mut LaneCursor, now: Tick) -> Option<Candidate> {
        let delay = self.delay_vc_to_pack;
        let ext = self.ext;
        let seq_length = self.seq_length;
        let vc = match class {
            Class::Lead => &self.drs,
            Class::Other => &self.ndr,
        };
        let lane = vc.scan(cursor, |m| {
            now - m.timing.memory_complete >= delay
                && match m.opcode {
                    Opcode::Ndr => ext.rsp > 0,
                    Opcode::Drs => ext.data > 0 && seq_length < SEQ_THRESHOLD,
                    _ => false,
                }
        })?;
        let opcode = vc.head(lane)?.opcode;
        Some(Candidate {
            class,
            lane,
            opcode,
        })
    }

    fn take(&mut self, candidate: &Candidate) -> Result<Message, SimError> {
        let message = match candidate.class {
            Class::Lead => self.drs.dequeue(candidate.lane)?,
            Class::Other => self.ndr.dequeue(candidate.lane)?,
        };
        match message.opcode {
            Opcode::Ndr => {
                Credits::consume(&mut self.ext.rsp, "rsp")?;
                // The write data has left the M2S RwD channel
                self.int.data += 1;
            }
            Opcode::Drs => Credits::consume(&mut self.ext.data, "data")?,
            op => return sim_error!("{}: illegal {} message in tx channel", self.entity, op),
        }
        Ok(message)
    }

    fn header_credits(&mut self, _flit: &Flit) -> Result<Credits, SimError> {
        self.int.check_within(&self.int_capacity, "Device")?;
        let req = Self::grant(self.int.req, self.num_hosts);
        let data = Self::grant(self.int.data, self.num_hosts);
        self.int.req -= req;
        self.int.data -= data;
        Ok(Credits::new(req, 0, data))
    }

    fn flushed(&mut self, rollover: u32) -> SimResult {
        if rollover > 0 {
            self.seq_length += 1;
        } else {
            self.seq_length = 0;
        }
        sim_assert!(
            !(self.seq_length == SEQ_THRESHOLD && rollover > 0),
            "{}: device packer sequence threshold violated",
            self.entity
        );
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.ndr.is_empty() && self.drs.is_empty()
    }

    fn any_ready(&self, now: Tick) -> bool {
        let ready = |m: &Message| now - m.timing.memory_complete >= self.delay_vc_to_pack;
        self.drs.any_head(ready) || self.ndr.any_head(ready)
    }
}

impl UnpackSink for DeviceChannels {
    fn accept(&mut self, message: Message) -> SimResult {
        match message.opcode {
            Opcode::Req => self.req.enqueue(message),
            Opcode::RwD => self.rwd.enqueue(message),
            op => sim_error!("{}: illegal {} message on rx buffer", self.entity, op),
        }
    }

    fn return_credits(&mut self, flit: &Flit) -> SimResult {
        self.ext.rsp += flit.header.credits.rsp;
        self.ext.data += flit.header.credits.data;
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.req.is_full() && self.rwd.is_full()
    }
}

pub struct Device {
    pub entity: Rc<Entity>,
    id: DeviceId,
    timing: LinkTiming,
    channels: DeviceChannels,
    packer: Packer,
    unpacker: Unpacker,
    transmitter: Transmitter,
    tx: Buffer<Flit>,
    rx: Buffer<Flit>,
    memory_arbiter: ClassArbiter,
    memory: Box<dyn MemoryModel>,
    pending: BTreeMap<u64, Message>,
    num_reqs: u64,
    stats: SkipStats,
}

impl Device {
    /// Create a device. `memory` builds the memory model as a child of the
    /// device entity.
    pub fn new<F>(
        parent: &Rc<Entity>,
        id: DeviceId,
        config: &DeviceConfig,
        timing: &LinkTiming,
        memory: F,
    ) -> Result<Self, SimError>
    where
        F: FnOnce(&Rc<Entity>) -> Box<dyn MemoryModel>,
    {
        sim_assert!(
            config.vc_size >= NUM_TX_LANES,
            "Device virtual channel size {} is smaller than its {} lanes",
            config.vc_size,
            NUM_TX_LANES
        );
        sim_assert!(config.num_hosts > 0, "A device needs at least one host");
        let entity = Rc::new(Entity::new(parent, &format!("device{}", id.0)));
        let vc = config.vc_size as i64;
        let lane_size = config.vc_size / NUM_TX_LANES;
        let channels = DeviceChannels {
            entity: entity.clone(),
            req: VirtualChannel::single(config.vc_size),
            rwd: VirtualChannel::single(config.vc_size),
            ndr: VirtualChannel::new(NUM_TX_LANES, lane_size),
            drs: VirtualChannel::new(NUM_TX_LANES, lane_size),
            // One of each is granted to the host at reset
            int: Credits::new(vc - 1, 0, vc - 1),
            int_capacity: Credits::new(vc, 0, vc),
            ext: Credits::default(),
            num_hosts: config.num_hosts as i64,
            seq_length: 0,
            delay_vc_to_pack: timing.delay_vc_to_pack,
        };
        let memory = memory(&entity);
        Ok(Self {
            packer: Packer::new(&entity, timing.device_packer_wait, Stage::Repacked),
            unpacker: Unpacker::new(&entity, timing.delay_rx_buf_to_unpack, Stage::Unpacked),
            transmitter: Transmitter::new(
                timing.delay_tx_buf_to_bus,
                timing.ticks_per_dequeue,
                Stage::Retransmitted,
            ),
            entity,
            id,
            timing: timing.clone(),
            channels,
            tx: Buffer::new(config.buffer_size),
            rx: Buffer::new(config.buffer_size),
            memory_arbiter: ClassArbiter::new(TokenPolicy::Alternate),
            memory,
            pending: BTreeMap::new(),
            num_reqs: 0,
            stats: SkipStats::new("Memory"),
        })
    }

    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn rx_buffer_mut(&mut self) -> &mut Buffer<Flit> {
        &mut self.rx
    }

    #[must_use]
    pub fn int_credits(&self) -> Credits {
        self.channels.int
    }

    #[must_use]
    pub fn ext_credits(&self) -> Credits {
        self.channels.ext
    }

    /// Requests submitted to memory so far.
    #[must_use]
    pub fn num_reqs(&self) -> u64 {
        self.num_reqs
    }

    /// Requests in memory that have not completed.
    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn skip_stats(&self) -> &SkipStats {
        &self.stats
    }

    #[must_use]
    pub fn num_flits_packed(&self) -> u64 {
        self.packer.num_flits()
    }

    fn memory_ready(&self, vc: &VirtualChannel, now: Tick) -> bool {
        vc.lane(0)
            .head_resident_for(now, self.timing.delay_vc_to_memory, |m| m.timing.unpacked)
    }

    fn can_skip_send(&self, now: Tick) -> bool {
        // A full memory queue is never skippable. It can drain on a memory
        // edge inside a skipped window, and a send due then would be missed.
        if self.memory.input_queue_full() {
            return false;
        }
        !(self.memory_ready(&self.channels.req, now) || self.memory_ready(&self.channels.rwd, now))
    }

    /// Submit one request to memory. RwD is the lead class.
    fn send_to_memory(&mut self, now: Tick) -> Result<bool, SimError> {
        let ch = &mut self.channels;
        sim_assert!(
            !(ch.req.is_full() && ch.rwd.is_full() && self.memory.input_queue_empty()),
            "{}: memory side stall",
            self.entity
        );
        let delay = self.timing.delay_vc_to_memory;
        let memory = &mut self.memory;
        let pending = &mut self.pending;
        let entity = &self.entity;
        let sent = self.memory_arbiter.arbitrate(|class| {
            let vc = match class {
                Class::Lead => &mut ch.rwd,
                Class::Other => &mut ch.req,
            };
            let ready = vc
                .lane(0)
                .head_resident_for(now, delay, |m| m.timing.unpacked);
            if !ready || memory.input_queue_full() {
                return Ok(None);
            }
            let mut message = vc.dequeue(0)?;
            message.timing.at_memory = now;
            let accepted = memory.submit(MemoryRequest::for_message(&message, now));
            sim_assert!(accepted, "{}: memory refused {}", entity, message);
            if message.opcode == Opcode::Req {
                ch.int.req += 1;
            }
            trace!(entity ; "to memory {}", message);
            pending.insert(message.msg_id, message);
            Ok(Some(()))
        })?;
        Ok(sent.is_some())
    }

    /// Clock the memory model and turn completed requests into responses.
    pub fn update_memory(&mut self, now: Tick) -> SimResult {
        self.memory.tick(now);
        for request in self.memory.drain_completed() {
            let Some(mut message) = self.pending.remove(&request.id) else {
                return sim_error!(
                    "{}: memory completion for unknown request {}",
                    self.entity,
                    request.id
                );
            };
            message.timing.memory_complete = now;
            let response = message.to_response()?;
            debug!(self.entity ; "memory complete {}", response);
            match response.opcode {
                Opcode::Drs => self.channels.drs.enqueue(response)?,
                _ => self.channels.ndr.enqueue(response)?,
            }
        }
        Ok(())
    }

    /// Advance the device by one tick.
    pub fn update(&mut self, ctx: &mut SimContext, bus: &mut Bus) -> SimResult {
        let now = ctx.now();

        let (pack_skip, did) = run_op!(
            ctx,
            self.packer.can_skip(&self.channels, now),
            self.packer.pack(&mut self.channels, ctx, &mut self.tx)?
        );
        SkipStats::record(&mut self.stats.packer, pack_skip, did)?;

        let (rx_skip, did) = run_op!(
            ctx,
            self.unpacker.can_skip(&self.rx, now),
            self.unpacker.unpack(&mut self.channels, now, &mut self.rx)?
        );
        SkipStats::record(&mut self.stats.unpacker, rx_skip, did)?;

        let (send_skip, did) = run_op!(ctx, self.can_skip_send(now), self.send_to_memory(now)?);
        SkipStats::record(&mut self.stats.service, send_skip, did)?;
        if did {
            self.num_reqs += 1;
        }

        let (tx_skip, did) = run_op!(
            ctx,
            self.transmitter.can_skip(&self.tx, bus, now),
            self.transmitter
                .transmit(&self.entity, &mut self.tx, bus, now)?
        );
        SkipStats::record(&mut self.stats.transmit, tx_skip, did)?;

        if ctx.is_memory_tick() {
            self.update_memory(now)?;
        }

        if pack_skip && rx_skip && send_skip && tx_skip {
            self.stats.skippable += 1;
        }
        Ok(())
    }
}

impl GetEntity for Device {
    fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }
}
