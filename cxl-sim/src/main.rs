// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Replay a memory-access trace on a simulated CXL.mem system.
//!
//! The work is done by [`cxl_sim::simulate`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cxl_engine::types::SimError;
use cxl_sim::config::{Overrides, SimConfig};
use cxl_sim::{RunError, simulate};
use cxl_track::Tracker;
use cxl_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};

/// `cxlsim` options. Values given here override the configuration file and
/// the environment.
#[derive(Parser)]
#[command(about = "Cycle-accurate CXL.mem link-layer simulator")]
struct Cli {
    /// Trace of `<address> <R|W> <gap>` lines to replay.
    trace: PathBuf,

    /// TOML file of configuration values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    /// Print log messages on the console.
    #[arg(long)]
    stdout: bool,

    /// Most verbose console message level.
    #[arg(long, default_value = "Info")]
    stdout_level: log::Level,

    /// Only entities whose path matches this expression use `--stdout-level`;
    /// the rest report errors only.
    #[arg(long, default_value_t)]
    stdout_filter: String,

    /// Write log messages to this file.
    #[arg(long)]
    log_file: Option<String>,

    /// Most verbose message level written to `--log-file`.
    #[arg(long, default_value = "Debug")]
    log_file_level: log::Level,

    /// Only entities whose path matches this expression use
    /// `--log-file-level`; the rest report errors only.
    #[arg(long, default_value_t)]
    log_file_filter: String,
}

fn build_trackers(args: &Cli) -> Result<Tracker, RunError> {
    let outputs = TrackersConfig {
        stdout: TrackerConfig {
            enable: args.stdout,
            level: args.stdout_level,
            filter_regex: &args.stdout_filter,
            file: None,
        },
        log_file: TrackerConfig {
            enable: args.log_file.is_some(),
            level: args.log_file_level,
            filter_regex: &args.log_file_filter,
            file: args.log_file.as_deref(),
        },
    };
    setup_trackers(&outputs).map_err(|e| RunError::Config(SimError(e.0)))
}

fn run(args: &Cli) -> Result<(), RunError> {
    let mut config = SimConfig::load(args.config.as_deref()).map_err(RunError::Config)?;
    args.overrides.apply(&mut config);
    let tracker = build_trackers(args)?;

    let result = simulate(&config, &args.trace, &tracker);
    tracker.shutdown();

    let summary = result?;
    println!(
        "Simulation finished at tick {} after {} requests ({} ticks skipped)",
        summary.end_tick, summary.num_requests, summary.ticks_skipped
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
