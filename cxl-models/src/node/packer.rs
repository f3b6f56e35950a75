// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The flit packer shared by hosts and devices.
//!
//! A packer builds one flit at a time out of the messages waiting in the
//! node's transmit virtual channels. A partially filled flit is held for up
//! to `wait_time` ticks to give later messages a chance to join it, after
//! which it is sent as is.
//!
//! A header carrying data is always followed by four data slots. Data slots
//! that do not fit in the current flit _roll over_ into the next one. While
//! rollover is pending no other header can claim slot 1 onwards.
//!
//! What differs between a host and a device (which channels exist, the credit
//! checks and the credits advertised in the flit header) is provided through
//! the [`PackSource`] trait.

use std::rc::Rc;

use cxl_components::arbiter::{Class, ClassArbiter, LaneCursor, TokenPolicy};
use cxl_components::buffer::Buffer;
use cxl_engine::context::SimContext;
use cxl_engine::types::{SimError, SimResult, Tick};
use cxl_engine::{sim_assert, sim_error};
use cxl_protocols::credits::Credits;
use cxl_protocols::flit::{Flit, Slot, SlotKind};
use cxl_protocols::message::{Message, Opcode};
use cxl_protocols::timing::Stage;
use cxl_protocols::{DATA_SLOTS_PER_HEADER, SLOTS_PER_FLIT};
use cxl_track::entity::Entity;
use cxl_track::{debug, trace};

/// A message at the head of a transmit lane that passed every check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub class: Class,
    pub lane: usize,
    pub opcode: Opcode,
}

/// The transmit side of a node as seen by the packer.
///
/// The lead class of the arbitration is the class whose messages carry data.
pub trait PackSource {
    /// A new flit has been started. `rollover_pending` is true if data from
    /// the previous flit still has to be sent.
    fn start_flit(&mut self, rollover_pending: bool);

    /// Find a message of `class` that could be packed now.
    fn find(&mut self, class: Class, cursor: &mut LaneCursor, now: Tick) -> Option<Candidate>;

    /// Remove a candidate from its lane and apply the credit effects of
    /// sending it.
    fn take(&mut self, candidate: &Candidate) -> Result<Message, SimError>;

    /// Credits to advertise in the header of a flit about to be sent.
    fn header_credits(&mut self, flit: &Flit) -> Result<Credits, SimError>;

    /// A flit has been sent, leaving `rollover` data slots for the next one.
    fn flushed(&mut self, rollover: u32) -> SimResult;

    /// True when every transmit lane is empty.
    fn is_empty(&self) -> bool;

    /// True when any lane head has been resident long enough to be packed.
    fn any_ready(&self, now: Tick) -> bool;
}

pub struct Packer {
    entity: Rc<Entity>,
    arbiter: ClassArbiter,
    cursor: LaneCursor,
    flit: Flit,
    waiting: bool,
    started_at: Tick,
    rollover: u32,
    last_header: Option<Message>,
    wait_time: Tick,
    stage: Stage,
    num_flits: u64,
}

impl Packer {
    /// Create a packer. Packed messages are stamped with `stage`.
    #[must_use]
    pub fn new(parent: &Rc<Entity>, wait_time: Tick, stage: Stage) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "packer")),
            arbiter: ClassArbiter::new(TokenPolicy::Packer),
            cursor: LaneCursor::new(),
            flit: Flit::new(),
            waiting: false,
            started_at: 0,
            rollover: 0,
            last_header: None,
            wait_time,
            stage,
            num_flits: 0,
        }
    }

    /// Data slots still owed to the last header.
    #[must_use]
    pub fn rollover(&self) -> u32 {
        self.rollover
    }

    /// True while a partially packed flit is held.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    #[must_use]
    pub fn num_flits(&self) -> u64 {
        self.num_flits
    }

    /// True if calling [`Packer::pack`] this tick cannot do any work.
    pub fn can_skip<S: PackSource>(&self, source: &S, now: Tick) -> bool {
        if self.rollover != 0 || self.waiting {
            return false;
        }
        source.is_empty() || !source.any_ready(now)
    }

    /// Send the current flit to `tx` and start afresh. Returns false if `tx`
    /// has no space, in which case the flit is kept.
    fn flush<S: PackSource>(
        &mut self,
        source: &mut S,
        ctx: &mut SimContext,
        tx: &mut Buffer<Flit>,
    ) -> Result<bool, SimError> {
        if tx.is_full() {
            trace!(self.entity ; "tx full, holding flit");
            return Ok(false);
        }
        let now = ctx.now();
        let mut flit = std::mem::take(&mut self.flit);
        flit.timing.created = now;
        flit.header.credits = source.header_credits(&flit)?;
        flit.set_time(self.stage, now);
        flit.flit_id = ctx.alloc_flit_id();
        debug!(self.entity ; "packed {}", flit);
        tx.enqueue(flit)?;
        self.waiting = false;
        self.num_flits += 1;
        source.flushed(self.rollover)?;
        Ok(true)
    }

    fn data_slot(&mut self) -> Result<Slot, SimError> {
        match &self.last_header {
            Some(header) => {
                self.rollover -= 1;
                Ok(Slot::data(header))
            }
            None => sim_error!("{}: data rollover without a header", self.entity),
        }
    }

    /// Whether a candidate header may go into slot `i` of the current flit.
    fn fits(&self, opcode: Opcode, i: usize) -> bool {
        let kind = SlotKind::for_header(opcode);
        if kind.is_data_header() {
            self.flit.count(kind) == 0 && (i == 0 || self.flit.slots_after_empty(i))
        } else {
            self.flit.count(kind) <= 1
        }
    }

    /// Run the packer for one tick. Returns true if it was active, which
    /// is the case whenever it holds a flit.
    pub fn pack<S: PackSource>(
        &mut self,
        source: &mut S,
        ctx: &mut SimContext,
        tx: &mut Buffer<Flit>,
    ) -> Result<bool, SimError> {
        let now = ctx.now();
        if !self.waiting {
            self.flit = Flit::new();
            self.started_at = now;
            source.start_flit(self.rollover > 0);
        }

        let timed_out = now - self.started_at > self.wait_time && !self.flit.is_empty();
        if self.waiting && (self.flit.is_full() || timed_out) {
            self.flush(source, ctx, tx)?;
            return Ok(true);
        }

        sim_assert!(
            self.rollover <= DATA_SLOTS_PER_HEADER,
            "{}: packer rollover illegal value {}",
            self.entity,
            self.rollover
        );

        if self.rollover > 0 && !self.waiting {
            if self.rollover == DATA_SLOTS_PER_HEADER {
                for i in 0..SLOTS_PER_FLIT {
                    let slot = self.data_slot()?;
                    self.flit.set_slot(i, slot);
                }
                // An all-data flit goes straight out
                self.waiting = !self.flush(source, ctx, tx)?;
                return Ok(true);
            }
            for i in 1..=(self.rollover as usize) {
                let slot = self.data_slot()?;
                self.flit.set_slot(i, slot);
            }
        }

        for i in 0..SLOTS_PER_FLIT {
            if !self.flit.slot(i).is_empty() {
                continue;
            }
            if self.rollover > 0 && i != 0 {
                let slot = self.data_slot()?;
                self.flit.set_slot(i, slot);
                continue;
            }

            let cursor = &mut self.cursor;
            let candidate = self
                .arbiter
                .arbitrate(|class| Ok(source.find(class, cursor, now)))?;
            let Some(candidate) = candidate else {
                break;
            };
            if !self.fits(candidate.opcode, i) {
                // Left in its lane for a later flit
                continue;
            }

            let message = source.take(&candidate)?;
            trace!(self.entity ; "slot {} <- {}", i, message);
            if message.opcode.carries_data() {
                self.last_header = Some(message.clone());
                self.rollover = DATA_SLOTS_PER_HEADER;
            }
            self.flit.set_slot(i, Slot::header(message));
        }

        self.waiting = !self.flit.is_empty();
        self.flit.check_slot_counts()?;
        Ok(self.waiting)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use cxl_engine::test_helpers::start_test;

    use super::*;

    /// A source with one lane per class and no credit limits.
    #[derive(Default)]
    struct Lanes {
        data: VecDeque<Message>,
        other: VecDeque<Message>,
        flushes: Vec<u32>,
    }

    impl Lanes {
        fn lane(&mut self, class: Class) -> &mut VecDeque<Message> {
            match class {
                Class::Lead => &mut self.data,
                Class::Other => &mut self.other,
            }
        }
    }

    impl PackSource for Lanes {
        fn start_flit(&mut self, _rollover_pending: bool) {}

        fn find(&mut self, class: Class, _cursor: &mut LaneCursor, _now: Tick) -> Option<Candidate> {
            self.lane(class).front().map(|m| Candidate {
                class,
                lane: 0,
                opcode: m.opcode,
            })
        }

        fn take(&mut self, candidate: &Candidate) -> Result<Message, SimError> {
            match self.lane(candidate.class).pop_front() {
                Some(m) => Ok(m),
                None => sim_error!("empty lane"),
            }
        }

        fn header_credits(&mut self, _flit: &Flit) -> Result<Credits, SimError> {
            Ok(Credits::default())
        }

        fn flushed(&mut self, rollover: u32) -> SimResult {
            self.flushes.push(rollover);
            Ok(())
        }

        fn is_empty(&self) -> bool {
            self.data.is_empty() && self.other.is_empty()
        }

        fn any_ready(&self, _now: Tick) -> bool {
            !self.is_empty()
        }
    }

    fn kinds(flit: &Flit) -> Vec<SlotKind> {
        flit.slots().iter().map(Slot::kind).collect()
    }

    #[test]
    fn full_flit_of_requests_and_header() {
        let mut ctx = start_test(file!());
        let mut packer = Packer::new(ctx.top(), 10, Stage::Packed);
        let mut lanes = Lanes::default();
        for i in 0..3 {
            lanes.other.push_back(Message::new(i, Opcode::Req, 0));
        }
        lanes.data.push_back(Message::new(9, Opcode::RwD, 0));
        let mut tx = Buffer::new(4);

        assert!(packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap());
        // Data first: the header takes slot 0 and its data follows
        assert!(packer.is_waiting());
        assert_eq!(packer.rollover(), 1);

        ctx.advance();
        assert!(packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap());
        let flit = tx.dequeue().unwrap();
        assert_eq!(
            kinds(&flit),
            vec![SlotKind::M2sRwdHdr, SlotKind::Data, SlotKind::Data, SlotKind::Data]
        );
        assert_eq!(flit.slot(0).message().unwrap().timing.packed, 1);
        assert_eq!(lanes.flushes, vec![1]);

        // The last data slot rolls over into slot 1; requests fill around it
        ctx.advance();
        packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap();
        assert_eq!(packer.rollover(), 0);
        assert_eq!(
            kinds(&packer.flit),
            vec![SlotKind::M2sReq, SlotKind::Data, SlotKind::M2sReq, SlotKind::Empty]
        );
        assert_eq!(lanes.other.len(), 1);
    }

    #[test]
    fn partial_flit_waits_then_goes() {
        let mut ctx = start_test(file!());
        let mut packer = Packer::new(ctx.top(), 10, Stage::Packed);
        let mut lanes = Lanes::default();
        lanes.other.push_back(Message::new(0, Opcode::Req, 0));
        let mut tx = Buffer::new(4);

        packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap();
        for _ in 0..10 {
            ctx.advance();
            packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap();
            assert!(tx.is_empty());
        }
        ctx.advance();
        assert!(packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap());
        assert_eq!(tx.len(), 1);
        assert!(!packer.is_waiting());
        assert!(packer.can_skip(&lanes, ctx.now()));
    }

    #[test]
    fn all_data_flit_waits_for_space() {
        let mut ctx = start_test(file!());
        let mut packer = Packer::new(ctx.top(), 10, Stage::Repacked);
        let mut lanes = Lanes::default();
        lanes.other.push_back(Message::new(0, Opcode::Req, 0));
        lanes.other.push_back(Message::new(1, Opcode::Req, 0));
        lanes.other.push_back(Message::new(2, Opcode::Ndr, 0));
        let mut tx = Buffer::new(1);

        packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap();

        // A header arriving late can only take the last slot so all four
        // of its data slots roll over
        ctx.advance();
        lanes.data.push_back(Message::new(3, Opcode::Drs, 0));
        packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap();
        assert_eq!(packer.rollover(), 4);

        ctx.advance();
        packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap();
        assert!(tx.is_full());
        assert_eq!(lanes.flushes, vec![4]);

        // The all-data flit is built but tx has no space
        ctx.advance();
        assert!(packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap());
        assert!(packer.is_waiting());
        assert_eq!(packer.rollover(), 0);
        assert!(!packer.can_skip(&lanes, ctx.now()));

        tx.dequeue().unwrap();
        ctx.advance();
        packer.pack(&mut lanes, &mut ctx, &mut tx).unwrap();
        let flit = tx.dequeue().unwrap();
        assert_eq!(flit.count(SlotKind::Data), 4);
        assert_eq!(flit.slot(0).message().unwrap().msg_id, 3);
        assert_eq!(lanes.flushes, vec![4, 0]);
    }
}
