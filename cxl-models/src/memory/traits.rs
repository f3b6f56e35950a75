// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use cxl_engine::types::Tick;

use crate::memory::MemoryRequest;

/// Interface between a node and the DRAM timing model behind it.
pub trait MemoryModel {
    /// Offer a request. Returns false if the model cannot take it this
    /// cycle, in which case the caller keeps it and retries.
    fn submit(&mut self, request: MemoryRequest) -> bool;

    fn input_queue_full(&self) -> bool;

    fn input_queue_empty(&self) -> bool;

    /// Advance the model by one memory clock.
    fn tick(&mut self, now: Tick);

    /// Take the requests that finished since the last call, in completion
    /// order.
    fn drain_completed(&mut self) -> Vec<MemoryRequest>;
}
