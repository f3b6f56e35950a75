// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The flit unpacker shared by hosts and devices.
//!
//! Flits are taken from the receive buffer once they have been there for
//! `delay_rx_buf_to_unpack` ticks. Each message is moved to the virtual
//! channel of its class. A header with data is only released once its four
//! data slots have arrived, which may take more than one flit.

use std::rc::Rc;

use cxl_components::buffer::Buffer;
use cxl_engine::types::{SimError, SimResult, Tick};
use cxl_engine::{sim_assert, sim_error};
use cxl_protocols::flit::{Flit, SlotKind};
use cxl_protocols::message::Message;
use cxl_protocols::timing::Stage;
use cxl_protocols::{DATA_SLOTS_PER_HEADER, SLOTS_PER_FLIT};
use cxl_track::entity::Entity;
use cxl_track::{debug, trace};

/// The receive side of a node as seen by the unpacker.
pub trait UnpackSink {
    /// Store an unpacked message in the virtual channel of its class.
    fn accept(&mut self, message: Message) -> SimResult;

    /// Add the credits granted in the header of `flit` to the external
    /// credits of the peer that sent it.
    fn return_credits(&mut self, flit: &Flit) -> SimResult;

    /// True when every receive virtual channel is full.
    fn is_full(&self) -> bool;
}

pub struct Unpacker {
    entity: Rc<Entity>,
    rollover: u32,
    last_header: Option<Message>,
    delay: Tick,
    stage: Stage,
    num_flits: u64,
}

impl Unpacker {
    /// Create an unpacker. Unpacked messages are stamped with `stage`.
    #[must_use]
    pub fn new(parent: &Rc<Entity>, delay: Tick, stage: Stage) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "unpacker")),
            rollover: 0,
            last_header: None,
            delay,
            stage,
            num_flits: 0,
        }
    }

    #[must_use]
    pub fn rollover(&self) -> u32 {
        self.rollover
    }

    #[must_use]
    pub fn num_flits(&self) -> u64 {
        self.num_flits
    }

    /// True if there is no flit ready to unpack.
    #[must_use]
    pub fn can_skip(&self, rx: &Buffer<Flit>, now: Tick) -> bool {
        !rx.head_resident_for(now, self.delay, |f| f.timing.received)
    }

    fn check_rollover_pattern(&self, flit: &Flit) -> SimResult {
        let is_data = |i: usize| flit.slot(i).kind() == SlotKind::Data;
        let ok = match self.rollover {
            0 => true,
            r if r < DATA_SLOTS_PER_HEADER => (1..=r as usize).all(is_data),
            _ => (0..SLOTS_PER_FLIT).all(is_data),
        };
        sim_assert!(ok, "{}: data rollover rule violated by {}", self.entity, flit);
        Ok(())
    }

    fn release<S: UnpackSink>(&mut self, sink: &mut S, now: Tick) -> SimResult {
        let Some(mut header) = self.last_header.take() else {
            return sim_error!("{}: data completed without a header", self.entity);
        };
        header.timing.set(self.stage, now);
        trace!(self.entity ; "unpacked {}", header);
        sink.accept(header)
    }

    /// Run the unpacker for one tick. Returns true if a flit was unpacked.
    pub fn unpack<S: UnpackSink>(
        &mut self,
        sink: &mut S,
        now: Tick,
        rx: &mut Buffer<Flit>,
    ) -> Result<bool, SimError> {
        sim_assert!(
            !(rx.is_full() && sink.is_full()),
            "{}: Rx side stall",
            self.entity
        );
        if !rx.head_resident_for(now, self.delay, |f| f.timing.received) {
            return Ok(false);
        }
        let flit = rx.dequeue()?;
        debug!(self.entity ; "unpacking {}", flit);

        sim_assert!(
            self.rollover <= DATA_SLOTS_PER_HEADER,
            "{}: rollover data out of range",
            self.entity
        );
        self.check_rollover_pattern(&flit)?;
        flit.check_slot_counts()?;

        // Data owed to the previous header comes first
        let mut consumed = [false; SLOTS_PER_FLIT];
        if self.rollover != 0 {
            for (i, done) in consumed.iter_mut().enumerate() {
                if flit.slot(i).kind() != SlotKind::Data {
                    continue;
                }
                *done = true;
                self.rollover -= 1;
                if self.rollover == 0 {
                    self.release(sink, now)?;
                    break;
                }
            }
        }

        for (i, slot) in flit.slots().iter().enumerate() {
            if consumed[i] {
                continue;
            }
            let kind = slot.kind();
            match (kind, slot.message()) {
                (SlotKind::Empty, _) => {}
                (SlotKind::Data, _) => {
                    sim_assert!(
                        self.rollover > 0,
                        "{}: data received when not expected",
                        self.entity
                    );
                    self.rollover -= 1;
                    if self.rollover == 0 {
                        self.release(sink, now)?;
                    }
                }
                (k, Some(message)) if k.is_data_header() => {
                    sim_assert!(
                        self.rollover == 0,
                        "{}: received {} header without getting previous data first",
                        self.entity,
                        message.opcode
                    );
                    self.rollover = DATA_SLOTS_PER_HEADER;
                    self.last_header = Some(message.clone());
                }
                (_, Some(message)) => {
                    let mut message = message.clone();
                    message.timing.set(self.stage, now);
                    trace!(self.entity ; "unpacked {}", message);
                    sink.accept(message)?;
                }
                (k, None) => {
                    return sim_error!("{}: {:?} slot without a message", self.entity, k);
                }
            }
        }

        sink.return_credits(&flit)?;
        self.num_flits += 1;
        Ok(true)
    }
}
