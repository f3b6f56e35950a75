// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The 68-byte flit and its slots.
//!
//! A flit holds [`SLOTS_PER_FLIT`] slots. A slot either carries one message
//! header, one 16-byte chunk of data belonging to an earlier header, or
//! nothing. The packing rules limit how many slots of each kind a single flit
//! can carry; they are checked by [`Flit::check_slot_counts`].

use std::fmt;

use cxl_engine::sim_assert;
use cxl_engine::types::{SimResult, Tick};

use crate::SLOTS_PER_FLIT;
use crate::credits::Credits;
use crate::message::{Message, Opcode};
use crate::timing::Stage;

/// Maximum number of request (or no-data response) headers per flit.
pub const MAX_REQ_SLOTS: usize = 2;

/// Maximum number of headers with data per flit.
pub const MAX_DATA_HEADER_SLOTS: usize = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotKind {
    M2sReq,
    M2sRwdHdr,
    S2mNdr,
    S2mDrsHdr,
    Data,
    #[default]
    Empty,
}

impl SlotKind {
    /// The kind of slot used to carry a message header.
    #[must_use]
    pub fn for_header(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Req => SlotKind::M2sReq,
            Opcode::RwD => SlotKind::M2sRwdHdr,
            Opcode::Ndr => SlotKind::S2mNdr,
            Opcode::Drs => SlotKind::S2mDrsHdr,
        }
    }

    /// Header kinds that are followed by data slots.
    #[must_use]
    pub fn is_data_header(&self) -> bool {
        matches!(self, SlotKind::M2sRwdHdr | SlotKind::S2mDrsHdr)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Slot {
    kind: SlotKind,
    message: Option<Message>,
}

impl Slot {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A slot carrying a message header.
    #[must_use]
    pub fn header(message: Message) -> Self {
        Self {
            kind: SlotKind::for_header(message.opcode),
            message: Some(message),
        }
    }

    /// A data slot. It carries a copy of the header it belongs to so that
    /// the receiver can route it.
    #[must_use]
    pub fn data(header: &Message) -> Self {
        Self {
            kind: SlotKind::Data,
            message: Some(header.clone()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kind == SlotKind::Empty
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlitTiming {
    pub created: Tick,
    pub transmitted: Tick,
    pub received: Tick,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlitHeader {
    /// Credits granted to the receiver of this flit.
    pub credits: Credits,

    /// Record of the kind of each slot.
    kinds: [SlotKind; SLOTS_PER_FLIT],
}

impl FlitHeader {
    #[must_use]
    pub fn kinds(&self) -> &[SlotKind; SLOTS_PER_FLIT] {
        &self.kinds
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Flit {
    pub flit_id: u64,
    pub timing: FlitTiming,
    pub header: FlitHeader,
    slots: [Slot; SLOTS_PER_FLIT],
}

impl Flit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn slot(&self, i: usize) -> &Slot {
        &self.slots[i]
    }

    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn set_slot(&mut self, i: usize, slot: Slot) {
        self.header.kinds[i] = slot.kind;
        self.slots[i] = slot;
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| !s.is_empty())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Slot::is_empty)
    }

    #[must_use]
    pub fn count(&self, kind: SlotKind) -> usize {
        self.slots.iter().filter(|s| s.kind == kind).count()
    }

    /// True when the slots following `i` are free for data.
    ///
    /// Only slots up to index 2 are examined. Slots are filled in order so
    /// the final slot can never be occupied when this is asked.
    #[must_use]
    pub fn slots_after_empty(&self, i: usize) -> bool {
        ((i + 1)..(SLOTS_PER_FLIT - 1)).all(|j| self.slots[j].is_empty())
    }

    /// Address of the first non-empty slot.
    #[must_use]
    pub fn first_address(&self) -> Option<u64> {
        self.slots
            .iter()
            .find_map(|s| s.message.as_ref().map(|m| m.address))
    }

    /// Stamp a stage on the message of every non-empty slot.
    pub fn set_time(&mut self, stage: Stage, tick: Tick) {
        for slot in &mut self.slots {
            if let Some(message) = &mut slot.message {
                message.timing.set(stage, tick);
            }
        }
    }

    /// Check the packing rules on the number of slots of each kind.
    pub fn check_slot_counts(&self) -> SimResult {
        let req = self.count(SlotKind::M2sReq);
        let ndr = self.count(SlotKind::S2mNdr);
        let hdr = self.count(SlotKind::M2sRwdHdr) + self.count(SlotKind::S2mDrsHdr);
        let data = self.count(SlotKind::Data);
        sim_assert!(
            req <= MAX_REQ_SLOTS && ndr <= MAX_REQ_SLOTS,
            "Packing rule violated: {} req/ndr slots in flit #{}",
            req.max(ndr),
            self.flit_id
        );
        sim_assert!(
            hdr <= MAX_DATA_HEADER_SLOTS,
            "Packing rule violated: {} data headers in flit #{}",
            hdr,
            self.flit_id
        );
        sim_assert!(
            data <= SLOTS_PER_FLIT,
            "Packing rule violated: {} data slots in flit #{}",
            data,
            self.flit_id
        );
        sim_assert!(
            req + ndr + hdr + data <= SLOTS_PER_FLIT,
            "Packing rule violated: too many slots in flit #{}",
            self.flit_id
        );
        Ok(())
    }
}

impl fmt::Display for Flit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{} ", self.flit_id)?;
        for slot in &self.slots {
            let id = slot.message.as_ref().map_or(0, |m| m.msg_id);
            match slot.kind {
                SlotKind::M2sReq => write!(f, "(req - {id}) ")?,
                SlotKind::M2sRwdHdr => write!(f, "(rwd - {id}) ")?,
                SlotKind::S2mNdr => write!(f, "(ndr - {id}) ")?,
                SlotKind::S2mDrsHdr => write!(f, "(drs - {id}) ")?,
                SlotKind::Data => write!(f, "(data - {id}) ")?,
                SlotKind::Empty => write!(f, "(empty) ")?,
            }
        }
        write!(f, "{}", self.header.credits)
    }
}
