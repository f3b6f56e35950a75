// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;

#[macro_export]
/// Build a [SimError] from a message that supports `to_string`, or from a
/// format string and its arguments
macro_rules! sim_error {
    ($fmt:literal, $($arg:tt)+) => {
        Err($crate::types::SimError(format!($fmt, $($arg)+)))
    };
    ($msg:expr) => {
        Err($crate::types::SimError($msg.to_string()))
    };
}

#[macro_export]
/// Return a [SimError] from the enclosing function if the condition is false
macro_rules! sim_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return $crate::sim_error!($($arg)+);
        }
    };
}

/// A broken protocol invariant or an unusable input. Never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct SimError(pub String);

impl SimError {
    /// Annotate the error with the tick at which it was raised.
    #[must_use]
    pub fn at_tick(self, tick: i64) -> Self {
        Self(format!("{} @{tick}", self.0))
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for SimError {}

/// Result of an update step that produces no value.
pub type SimResult = Result<(), SimError>;

/// Simulation time in ticks.
pub type Tick = i64;
