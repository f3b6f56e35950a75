// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Models of the components of a CXL.mem system.
//!
//! A [System](crate::system::System) is made of one
//! [Host](crate::node::host::Host) replaying a memory-access trace and one or
//! more [Devices](crate::node::device::Device), joined by
//! [buses](cxl_components::bus::Bus) and, when there is more than one
//! device, a [Switch](crate::switch::Switch).
//!
//! Hosts and devices exchange 68-byte flits of four slots. Flow control uses
//! credits: a node only packs a message when its peer has granted room for
//! it and the node itself has room for the eventual response.
//!
//! # Example
//!
//! ```rust
//! use std::collections::VecDeque;
//!
//! use cxl_engine::context::SimContext;
//! use cxl_engine::params::CxlParams;
//! use cxl_models::system::{System, SystemConfig};
//! use cxl_models::trace::parse_line;
//! use cxl_track::tracker::dev_null_tracker;
//!
//! let mut ctx = SimContext::new(&dev_null_tracker(), &CxlParams::default()).unwrap();
//! let trace: VecDeque<_> = ["0xb00000000000040 R 0", "0xb00000000000080 W 10"]
//!     .iter()
//!     .map(|line| parse_line(line).unwrap())
//!     .collect();
//!
//! let mut system = System::new(&ctx, &SystemConfig::default(), Box::new(trace)).unwrap();
//! system.run_until_complete(&mut ctx, 2, Some(1_000_000)).unwrap();
//! assert_eq!(system.host().unwrap().num_completed(), 2);
//! ```

pub mod memory;
pub mod node;
pub mod stats;
pub mod switch;
pub mod system;
pub mod test_helpers;
pub mod trace;
