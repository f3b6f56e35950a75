// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Memory behind the link.
//!
//! Devices own a memory model that serves the requests they unpack. A host
//! can also own a direct-attached memory (DAM) which serves an address range
//! without going over the link.
//!
//! Memory models run on their own clock. The owner calls
//! [`MemoryModel::tick`](traits::MemoryModel::tick) on every memory clock
//! edge and collects finished requests with
//! [`MemoryModel::drain_completed`](traits::MemoryModel::drain_completed).

use cxl_engine::types::Tick;
use cxl_protocols::message::{Message, Opcode};

pub mod fixed_latency;
pub mod memory_map;
pub mod traits;

/// A request as seen by a memory model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRequest {
    /// Id of the message this request was made for.
    pub id: u64,
    pub address: u64,
    pub is_write: bool,

    /// Tick at which the request was accepted.
    pub submitted_at: Tick,
}

impl MemoryRequest {
    #[must_use]
    pub fn for_message(message: &Message, now: Tick) -> Self {
        Self {
            id: message.msg_id,
            address: message.address,
            is_write: message.opcode == Opcode::RwD,
            submitted_at: now,
        }
    }
}
