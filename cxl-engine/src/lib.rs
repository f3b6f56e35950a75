// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! Core of the CXL link-layer simulator.
//!
//! The simulator is driven one tick at a time. This crate provides the pieces
//! shared by every model:
//!  - the [simulation context](crate::context::SimContext) holding the current
//!    tick and the identifier counters,
//!  - the [link parameters](crate::params::CxlParams) and their conversion to
//!    [tick-based timing](crate::params::LinkTiming),
//!  - the [error type](crate::types::SimError) used to report protocol
//!    invariant violations.
//!
//! # Simple Application
//!
//! ```rust
//! use cxl_engine::context::SimContext;
//! use cxl_engine::params::CxlParams;
//! use cxl_track::tracker::dev_null_tracker;
//!
//! let mut ctx = SimContext::new(&dev_null_tracker(), &CxlParams::default()).unwrap();
//! assert_eq!(ctx.timing().bus_size, 15);
//! ctx.advance();
//! assert_eq!(ctx.now(), 1);
//! ```

pub mod context;
pub mod params;
pub mod test_helpers;
pub mod types;
