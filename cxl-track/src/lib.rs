// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Per-component logging for the CXL simulator.
//!
//! Each part of a model (host, packer, bus, memory) owns an
//! [`Entity`](crate::entity::Entity) whose path, e.g. `top::device1::memory`,
//! locates its messages. When an entity is created the [`Tracker`] decides
//! the most verbose [`log::Level`] it may emit, usually by matching regular
//! expressions against the path. The entity keeps that level so that a
//! disabled message costs one comparison and is never formatted.
//!
//! Messages are emitted with the [`trace!`], [`debug!`], [`info!`],
//! [`warn!`] and [`error!`] macros:
//!
//! ```rust
//! use cxl_track::entity::toplevel;
//! use cxl_track::tracker::dev_null_tracker;
//!
//! let top = toplevel(&dev_null_tracker(), "top");
//! cxl_track::debug!(top ; "flit {} sent", 3);
//! ```

#![warn(missing_docs)]

pub use log;

pub mod builder;
pub mod entity;
pub mod test_helpers;
pub mod tracker;

pub use tracker::{Track, Tracker};

/// Where text trackers write.
pub type Writer = Box<dyn std::io::Write>;

/// Emit a message at the given level if the entity allows it.
#[macro_export]
macro_rules! log_base {
    ($entity:expr ; $lvl:expr, $($arg:tt)+) => (
        if $entity.is_enabled($lvl) {
            $entity.log($lvl, format_args!($($arg)+));
        }
    );
}

/// Emit a `Trace` message.
#[macro_export]
macro_rules! trace {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Trace, $($arg)+);
    );
}

/// Emit a `Debug` message.
#[macro_export]
macro_rules! debug {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Debug, $($arg)+);
    );
}

/// Emit an `Info` message.
#[macro_export]
macro_rules! info {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Info, $($arg)+);
    );
}

/// Emit a `Warn` message.
#[macro_export]
macro_rules! warn {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Warn, $($arg)+);
    );
}

/// Emit an `Error` message.
#[macro_export]
macro_rules! error {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Error, $($arg)+);
    );
}
