// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! CXL.mem messages.

use std::fmt;

use cxl_engine::sim_error;
use cxl_engine::types::SimError;

use crate::timing::MessageTiming;

/// CXL.mem opcodes.
///
/// `Req` and `RwD` travel master to subordinate (M2S), `Ndr` and `Drs`
/// travel subordinate to master (S2M).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Read request.
    Req,
    /// Request with data (a write).
    RwD,
    /// No-data response (write completion).
    Ndr,
    /// Data response (read data).
    Drs,
}

impl Opcode {
    /// True for the header opcodes followed by four data slots.
    #[must_use]
    pub fn carries_data(&self) -> bool {
        matches!(self, Opcode::RwD | Opcode::Drs)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Opcode::Req => "Req",
            Opcode::RwD => "RwD",
            Opcode::Ndr => "NDR",
            Opcode::Drs => "DRS",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Unique per request. A response keeps the id of its request.
    pub msg_id: u64,
    pub opcode: Opcode,
    pub address: u64,
    pub timing: MessageTiming,
}

impl Message {
    #[must_use]
    pub fn new(msg_id: u64, opcode: Opcode, address: u64) -> Self {
        Self {
            msg_id,
            opcode,
            address,
            timing: MessageTiming {
                is_write: opcode == Opcode::RwD,
                ..MessageTiming::default()
            },
        }
    }

    /// Turn a request into the response the memory returns for it.
    ///
    /// A read (`Req`) becomes a data response (`Drs`) and a write (`RwD`)
    /// becomes a no-data response (`Ndr`).
    pub fn to_response(&self) -> Result<Message, SimError> {
        let opcode = match self.opcode {
            Opcode::Req => Opcode::Drs,
            Opcode::RwD => Opcode::Ndr,
            op => return sim_error!("Cannot respond to a {} message", op),
        };
        Ok(Message {
            opcode,
            ..self.clone()
        })
    }

    /// Table identifier encoded in the upper address bits.
    #[must_use]
    pub fn table_id(&self) -> u64 {
        (self.address >> 48) & 0xFFF
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{:#010x},{})", self.msg_id, self.address, self.opcode)
    }
}
