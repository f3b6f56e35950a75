// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A CXL link in one direction.
//!
//! The bus models both latency and bandwidth:
//!  - a flit can only leave the bus once it has been on it for the bus
//!    latency (measured from the flit's `transmitted` tick),
//!  - consecutive flits leave at least `ticks_per_dequeue` ticks apart,
//!  - at most `bus_size` flits can be in flight.
//!
//! On delivery the flit's `received` tick is set along with the message
//! stage that corresponds to the receiving end of the bus.
//!
//! A bus can also keep a [`BusRecord`] of every flit it carries. The history
//! grows with the length of the run so it is off unless
//! [`Bus::set_record_history`] turns it on.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use cxl_engine::params::LinkTiming;
use cxl_engine::sim_assert;
use cxl_engine::types::{SimError, SimResult, Tick};
use cxl_protocols::flit::{Flit, SlotKind};
use cxl_protocols::timing::Stage;
use cxl_track::entity::{Entity, GetEntity};
use cxl_track::trace;

use crate::buffer::Buffer;

/// Which two kinds of endpoint a bus joins, in the direction of travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusRole {
    HostSwitch,
    SwitchDevice,
    DeviceSwitch,
    SwitchHost,
    HostDevice,
    DeviceHost,
}

impl BusRole {
    /// The message stage reached when a flit leaves a bus of this role.
    #[must_use]
    pub fn arrival_stage(&self) -> Stage {
        match self {
            BusRole::HostSwitch => Stage::SwitchDsRx,
            BusRole::SwitchDevice | BusRole::HostDevice => Stage::Received,
            BusRole::DeviceSwitch => Stage::SwitchUsRx,
            BusRole::SwitchHost | BusRole::DeviceHost => Stage::RespReceived,
        }
    }
}

impl fmt::Display for BusRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BusRole::HostSwitch => "host->switch",
            BusRole::SwitchDevice => "switch->device",
            BusRole::DeviceSwitch => "device->switch",
            BusRole::SwitchHost => "switch->host",
            BusRole::HostDevice => "host->device",
            BusRole::DeviceHost => "device->host",
        };
        write!(f, "{s}")
    }
}

/// Residency of one flit on the bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusRecord {
    pub added: Tick,
    pub removed: Tick,
    pub num_data: usize,
    pub num_empty: usize,
}

pub struct Bus {
    pub entity: Rc<Entity>,
    role: BusRole,
    capacity: usize,
    latency: Tick,
    ticks_per_dequeue: Tick,
    flits: VecDeque<Flit>,
    last_dequeue: Tick,
    record_history: bool,
    records: BTreeMap<u64, BusRecord>,
}

impl Bus {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, role: BusRole, timing: &LinkTiming) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, name)),
            role,
            capacity: timing.bus_size,
            latency: timing.bus_latency,
            ticks_per_dequeue: timing.ticks_per_dequeue,
            flits: VecDeque::new(),
            last_dequeue: 0,
            record_history: false,
            records: BTreeMap::new(),
        }
    }

    /// Keep a [`BusRecord`] for each flit added from now on.
    pub fn set_record_history(&mut self, on: bool) {
        self.record_history = on;
    }

    #[must_use]
    pub fn role(&self) -> BusRole {
        self.role
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flits.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.flits.len() >= self.capacity
    }

    /// Put a flit on the bus. The sender must have checked for space.
    pub fn add(&mut self, flit: Flit, now: Tick) -> SimResult {
        sim_assert!(!self.is_full(), "Adding to {} bus {} when it is full", self.role, self.entity);
        if self.is_empty() {
            self.last_dequeue = now;
        }
        trace!(self.entity ; "add {}", flit);
        if self.record_history {
            self.records.insert(
                flit.flit_id,
                BusRecord {
                    added: now,
                    removed: 0,
                    num_data: flit.count(SlotKind::Data),
                    num_empty: flit.count(SlotKind::Empty),
                },
            );
        }
        self.flits.push_back(flit);
        Ok(())
    }

    fn head_is_stagnant(&self, now: Tick) -> bool {
        self.flits
            .front()
            .is_some_and(|f| now - f.timing.transmitted > self.latency)
    }

    /// Advance the bus by one tick, delivering at most one flit to `dest`.
    ///
    /// Returns whether a flit was delivered.
    pub fn update(&mut self, now: Tick, dest: &mut Buffer<Flit>) -> Result<bool, SimError> {
        sim_assert!(
            self.flits.len() <= self.capacity,
            "Bus size exceeded on {}",
            self.entity
        );
        sim_assert!(!self.head_is_stagnant(now), "Stagnant flit in bus {}", self.entity);

        if now - self.last_dequeue < self.ticks_per_dequeue {
            return Ok(false);
        }
        let ready = self
            .flits
            .front()
            .is_some_and(|f| now - f.timing.transmitted >= self.latency);
        if !ready {
            return Ok(false);
        }

        sim_assert!(
            !dest.is_full(),
            "Receive buffer full when {} delivers",
            self.entity
        );
        let Some(mut flit) = self.flits.pop_front() else {
            return Ok(false);
        };
        flit.timing.received = now;
        flit.set_time(self.role.arrival_stage(), now);
        if let Some(record) = self.records.get_mut(&flit.flit_id) {
            record.removed = now;
        }
        trace!(self.entity ; "deliver {}", flit);
        dest.enqueue(flit)?;
        self.last_dequeue = now;
        Ok(true)
    }

    /// Residency records by flit id. Empty unless history is recorded.
    #[must_use]
    pub fn records(&self) -> &BTreeMap<u64, BusRecord> {
        &self.records
    }
}

impl GetEntity for Bus {
    fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }
}

#[cfg(test)]
mod tests {
    use cxl_engine::params::CxlParams;
    use cxl_protocols::flit::Slot;
    use cxl_protocols::message::{Message, Opcode};
    use cxl_track::entity::toplevel;
    use cxl_track::tracker::dev_null_tracker;

    use super::*;

    fn flit_sent_at(id: u64, tick: Tick) -> Flit {
        let mut flit = Flit::new();
        flit.flit_id = id;
        flit.set_slot(0, Slot::header(Message::new(id, Opcode::Req, 0)));
        flit.timing.transmitted = tick;
        flit
    }

    fn make_bus() -> Bus {
        let top = toplevel(&dev_null_tracker(), "top");
        let timing = CxlParams::default().timing().unwrap();
        Bus::new(&top, "bus", BusRole::HostDevice, &timing)
    }

    #[test]
    fn delivery_after_latency() {
        let mut bus = make_bus();
        bus.set_record_history(true);
        let mut rx = Buffer::new(4);
        bus.add(flit_sent_at(0, 10), 10).unwrap();

        assert!(!bus.update(159, &mut rx).unwrap());
        assert!(bus.update(160, &mut rx).unwrap());

        let flit = rx.dequeue().unwrap();
        assert_eq!(flit.timing.received, 160);
        assert_eq!(flit.slot(0).message().unwrap().timing.received, 160);
        assert_eq!(bus.records()[&0].removed, 160);
    }

    #[test]
    fn history_is_off_by_default() {
        let mut bus = make_bus();
        let mut rx = Buffer::new(4);
        bus.add(flit_sent_at(0, 0), 0).unwrap();
        assert!(bus.update(150, &mut rx).unwrap());
        assert!(bus.records().is_empty());

        bus.set_record_history(true);
        bus.add(flit_sent_at(1, 200), 200).unwrap();
        assert!(bus.update(350, &mut rx).unwrap());
        assert_eq!(bus.records().len(), 1);
        assert_eq!(bus.records()[&1].removed, 350);
    }

    #[test]
    fn capacity_is_bus_size() {
        let mut bus = make_bus();
        for i in 0..15 {
            bus.add(flit_sent_at(i, 0), 0).unwrap();
        }
        assert!(bus.is_full());
        assert!(bus.add(flit_sent_at(15, 0), 0).is_err());
    }

    #[test]
    fn full_receiver_is_fatal() {
        let mut bus = make_bus();
        let mut rx = Buffer::new(0);
        bus.add(flit_sent_at(0, 0), 0).unwrap();
        let err = bus.update(150, &mut rx).unwrap_err();
        assert!(err.0.starts_with("Receive buffer full"));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    #[should_panic(expected = "Stagnant flit")]
    fn back_to_back_transmission_stagnates() {
        let mut bus = make_bus();
        let mut rx = Buffer::new(4);
        bus.add(flit_sent_at(0, 0), 0).unwrap();
        bus.add(flit_sent_at(1, 0), 0).unwrap();
        assert!(bus.update(150, &mut rx).unwrap());
        // The second flit must wait for the dequeue spacing and overstays
        bus.update(151, &mut rx).unwrap();
    }
}
