// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The simulation context.
//!
//! A [`SimContext`] replaces the global state a cycle-based simulator would
//! otherwise need: the current tick, the derived link timing and the counters
//! used to allocate message and flit identifiers. It is passed explicitly to
//! every update function.

use std::rc::Rc;

use cxl_track::entity::{Entity, toplevel};
use cxl_track::Tracker;

use crate::params::{CxlParams, LinkTiming};
use crate::sim_assert;
use crate::types::{SimError, SimResult, Tick};

pub struct SimContext {
    top: Rc<Entity>,
    tick: Tick,
    timing: LinkTiming,
    next_msg_id: u64,
    next_flit_id: u64,

    /// When set, operations whose skip predicate holds are not executed.
    pub skip_cycle: bool,
}

impl SimContext {
    pub fn new(tracker: &Tracker, params: &CxlParams) -> Result<Self, SimError> {
        Ok(Self {
            top: toplevel(tracker, "top"),
            tick: 0,
            timing: params.timing()?,
            next_msg_id: 0,
            next_flit_id: 0,
            skip_cycle: true,
        })
    }

    /// The top-level entity under which all components are created.
    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.top
    }

    #[must_use]
    pub fn now(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn timing(&self) -> &LinkTiming {
        &self.timing
    }

    /// Move to the next tick.
    pub fn advance(&mut self) {
        self.set_tick(self.tick + 1);
    }

    /// Jump forward in time. Time never goes backwards.
    pub fn advance_to(&mut self, tick: Tick) -> SimResult {
        sim_assert!(
            tick >= self.tick,
            "Time cannot go backwards from {} to {}",
            self.tick,
            tick
        );
        self.set_tick(tick);
        Ok(())
    }

    fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
        self.top.tracker.set_tick(tick);
    }

    /// True when the memory models are clocked on this tick.
    #[must_use]
    pub fn is_memory_tick(&self) -> bool {
        self.tick % self.timing.delay_memory_update == 0
    }

    pub fn alloc_msg_id(&mut self) -> u64 {
        let id = self.next_msg_id;
        self.next_msg_id += 1;
        id
    }

    pub fn alloc_flit_id(&mut self) -> u64 {
        let id = self.next_flit_id;
        self.next_flit_id += 1;
        id
    }
}
