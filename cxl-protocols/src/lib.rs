// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The CXL.mem protocol data types.
//!
//! A [Message](crate::message::Message) is a single CXL.mem transaction
//! (request or response). Messages are carried in the slots of a 68-byte
//! [Flit](crate::flit::Flit) whose header also returns
//! [Credits](crate::credits::Credits) to the peer.

pub mod credits;
pub mod flit;
pub mod message;
pub mod timing;

/// Number of slots in a 68-byte flit.
pub const SLOTS_PER_FLIT: usize = 4;

/// Number of data slots that follow a header carrying data (64 bytes of
/// data in 16-byte slots).
pub const DATA_SLOTS_PER_HEADER: u32 = 4;
