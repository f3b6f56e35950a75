// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Building blocks shared by the CXL models.
//!
//! All components are driven by explicit calls from the model that owns
//! them, passing in the current tick. None of them hold references to their
//! neighbours; the system wiring looks up the destination of a transfer and
//! hands it in.
//!
//!  - [Buffer](crate::buffer::Buffer): bounded FIFO with residency checks.
//!  - [Bus](crate::bus::Bus): fixed-latency, bandwidth-limited link.
//!  - [ClassArbiter](crate::arbiter::ClassArbiter): two-class arbitration
//!    token.
//!  - [VirtualChannel](crate::virtual_channel::VirtualChannel): a message
//!    class made of one or more lanes.

pub mod arbiter;
pub mod buffer;
pub mod bus;
pub mod virtual_channel;
