// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A fixed-latency DRAM model.
//!
//! Requests wait in a bounded input queue. On every memory clock at most one
//! request moves from the queue into service, as long as fewer than
//! `max_in_flight` requests are being served. A request completes a fixed
//! number of memory clocks after entering service; reads and writes have
//! separate latencies.

use std::collections::VecDeque;
use std::rc::Rc;

use cxl_engine::types::Tick;
use cxl_track::entity::{Entity, GetEntity};
use cxl_track::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryRequest;
use crate::memory::traits::MemoryModel;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedLatencyConfig {
    pub queue_size: usize,
    /// Memory clocks from entering service to completion of a read.
    pub read_latency: u64,
    /// Memory clocks from entering service to completion of a write.
    pub write_latency: u64,
    pub max_in_flight: usize,
}

impl Default for FixedLatencyConfig {
    fn default() -> Self {
        Self {
            queue_size: 32,
            read_latency: 80,
            write_latency: 60,
            max_in_flight: 64,
        }
    }
}

struct InService {
    done_at: u64,
    request: MemoryRequest,
}

pub struct FixedLatencyMemory {
    pub entity: Rc<Entity>,
    config: FixedLatencyConfig,
    input: VecDeque<MemoryRequest>,
    in_service: Vec<InService>,
    completed: Vec<MemoryRequest>,
    clock: u64,
}

impl FixedLatencyMemory {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, config: FixedLatencyConfig) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, name)),
            config,
            input: VecDeque::new(),
            in_service: Vec::new(),
            completed: Vec::new(),
            clock: 0,
        }
    }

    fn latency(&self, request: &MemoryRequest) -> u64 {
        if request.is_write {
            self.config.write_latency
        } else {
            self.config.read_latency
        }
    }
}

impl MemoryModel for FixedLatencyMemory {
    fn submit(&mut self, request: MemoryRequest) -> bool {
        if self.input_queue_full() {
            return false;
        }
        trace!(self.entity ; "accept {} {:#x}", request.id, request.address);
        self.input.push_back(request);
        true
    }

    fn input_queue_full(&self) -> bool {
        self.input.len() >= self.config.queue_size
    }

    fn input_queue_empty(&self) -> bool {
        self.input.is_empty()
    }

    fn tick(&mut self, now: Tick) {
        self.clock += 1;

        if self.in_service.len() < self.config.max_in_flight {
            if let Some(request) = self.input.pop_front() {
                let done_at = self.clock + self.latency(&request);
                self.in_service.push(InService { done_at, request });
            }
        }

        let clock = self.clock;
        let (done, busy): (Vec<_>, Vec<_>) = self
            .in_service
            .drain(..)
            .partition(|s| s.done_at <= clock);
        self.in_service = busy;
        for s in done {
            debug!(self.entity ; "complete {} @{}", s.request.id, now);
            self.completed.push(s.request);
        }
    }

    fn drain_completed(&mut self) -> Vec<MemoryRequest> {
        std::mem::take(&mut self.completed)
    }
}

impl GetEntity for FixedLatencyMemory {
    fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }
}

#[cfg(test)]
mod tests {
    use cxl_track::entity::toplevel;
    use cxl_track::tracker::dev_null_tracker;

    use super::*;

    fn request(id: u64, is_write: bool) -> MemoryRequest {
        MemoryRequest {
            id,
            address: id * 0x40,
            is_write,
            submitted_at: 0,
        }
    }

    fn memory(config: FixedLatencyConfig) -> FixedLatencyMemory {
        let top = toplevel(&dev_null_tracker(), "top");
        FixedLatencyMemory::new(&top, "mem", config)
    }

    fn is_idle(mem: &FixedLatencyMemory) -> bool {
        mem.input.is_empty() && mem.in_service.is_empty() && mem.completed.is_empty()
    }

    #[test]
    fn read_completes_after_latency() {
        let mut mem = memory(FixedLatencyConfig {
            read_latency: 3,
            ..FixedLatencyConfig::default()
        });
        assert!(mem.submit(request(1, false)));
        for _ in 0..3 {
            mem.tick(0);
            assert!(mem.drain_completed().is_empty());
        }
        mem.tick(0);
        let done = mem.drain_completed();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, 1);
        assert!(is_idle(&mem));
    }

    #[test]
    fn writes_can_overtake_reads() {
        let mut mem = memory(FixedLatencyConfig {
            read_latency: 5,
            write_latency: 1,
            ..FixedLatencyConfig::default()
        });
        assert!(mem.submit(request(1, false)));
        assert!(mem.submit(request(2, true)));
        let mut order = Vec::new();
        for _ in 0..8 {
            mem.tick(0);
            order.extend(mem.drain_completed().into_iter().map(|r| r.id));
        }
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn input_queue_is_bounded() {
        let mut mem = memory(FixedLatencyConfig {
            queue_size: 2,
            ..FixedLatencyConfig::default()
        });
        assert!(mem.input_queue_empty());
        assert!(mem.submit(request(1, false)));
        assert!(mem.submit(request(2, false)));
        assert!(mem.input_queue_full());
        assert!(!mem.submit(request(3, false)));
        // One request enters service per clock
        mem.tick(0);
        assert!(!mem.input_queue_full());
        assert!(!mem.input_queue_empty());
    }
}
