// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Run a trace through a CXL.mem system.
//!
//! The `cxlsim` binary is a thin wrapper around [`simulate`]: it layers the
//! configuration (see [`config`]), sets up the trackers and maps the two
//! kinds of [`RunError`] to exit codes.
//!
//! # Example
//!
//! ```text
//! cxlsim trace.txt --config system.toml --latency-file latency.csv
//! CXLSIM_SYSTEM__DEVICE__VC_SIZE=64 cxlsim trace.txt --stdout
//! ```

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use cxl_engine::context::SimContext;
use cxl_engine::types::{SimError, Tick};
use cxl_models::system::System;
use cxl_models::trace::{TraceReader, TraceSource, count_requests};
use cxl_track::{Tracker, info};

pub mod config;
pub mod report;

use crate::config::SimConfig;

/// Why a run failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    /// The configuration, command line or trace is invalid.
    Config(SimError),
    /// The simulation itself failed.
    Sim(SimError),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => 2,
            RunError::Sim(_) => 3,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunError::Config(e) | RunError::Sim(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for RunError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub num_requests: u64,
    pub end_tick: Tick,
    pub ticks_skipped: Tick,
}

fn open_trace(path: &Path) -> Result<BufReader<File>, SimError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| SimError(format!("Unable to open trace '{}': {e}", path.display())))
}

/// Parse every line of the trace so that a malformed one is reported before
/// the simulation starts. Returns the number of requests.
fn check_trace(path: &Path) -> Result<u64, SimError> {
    let mut reader = TraceReader::new(open_trace(path)?);
    while reader.next_entry()?.is_some() {}
    count_requests(open_trace(path)?)
}

/// Replay the trace at `trace_path` on the system described by `config`.
pub fn simulate(
    config: &SimConfig,
    trace_path: &Path,
    tracker: &Tracker,
) -> Result<RunSummary, RunError> {
    config.validate().map_err(RunError::Config)?;
    let num_requests = check_trace(trace_path).map_err(RunError::Config)?;

    let mut ctx = SimContext::new(tracker, &config.params).map_err(RunError::Config)?;
    ctx.skip_cycle = config.skip_cycle;
    let trace = TraceReader::new(open_trace(trace_path).map_err(RunError::Config)?);
    let mut system =
        System::new(&ctx, &config.system, Box::new(trace)).map_err(RunError::Config)?;

    info!(ctx.top() ; "Replaying {} requests from {}", num_requests, trace_path.display());
    system
        .run_until_complete(&mut ctx, num_requests, config.max_ticks)
        .map_err(RunError::Sim)?;
    system.log_summary(&ctx).map_err(RunError::Sim)?;

    if let Some(path) = &config.latency_file {
        let host = system.host().map_err(RunError::Sim)?;
        report::write_latency_file(path, host.dam_latency(), host.cxl_latency())
            .map_err(RunError::Config)?;
    }

    Ok(RunSummary {
        num_requests,
        end_tick: ctx.now(),
        ticks_skipped: system.ticks_skipped(),
    })
}
