// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Configuration of a simulation run.
//!
//! Values are merged from several sources, later ones taking priority:
//!  1. the defaults of [`SimConfig`],
//!  2. an optional TOML file,
//!  3. environment variables prefixed with `CXLSIM_`, using `__` to separate
//!     nested keys (e.g. `CXLSIM_SYSTEM__HOST__VC_SIZE=64`),
//!  4. the command-line [`Overrides`].

use std::path::{Path, PathBuf};

use clap::Args;
use cxl_engine::params::CxlParams;
use cxl_engine::sim_error;
use cxl_engine::types::{SimError, SimResult, Tick};
use cxl_models::system::SystemConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "CXLSIM_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub params: CxlParams,
    pub system: SystemConfig,

    /// Skip operations that cannot make progress and jump over idle periods.
    pub skip_cycle: bool,

    /// Report a deadlock if the trace has not completed by this tick.
    pub max_ticks: Option<Tick>,

    /// Write the per-table latency averages to this CSV file.
    pub latency_file: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            params: CxlParams::default(),
            system: SystemConfig::default(),
            skip_cycle: true,
            max_ticks: None,
            latency_file: None,
        }
    }
}

impl SimConfig {
    /// The merged defaults, configuration file and environment.
    #[must_use]
    pub fn figment(conf_file: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(SimConfig::default()));
        if let Some(conf_file) = conf_file {
            figment = figment.merge(Toml::file(conf_file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load the configuration from every source but the command line.
    pub fn load(conf_file: Option<&Path>) -> Result<Self, SimError> {
        if let Some(conf_file) = conf_file {
            if conf_file.is_dir() {
                return sim_error!("{} is not a file path", conf_file.display());
            }
            if !conf_file.exists() {
                return sim_error!("{} not found", conf_file.display());
            }
        }
        Self::figment(conf_file)
            .extract()
            .map_err(|e| SimError(format!("Invalid configuration: {e}")))
    }

    /// Check that the configuration describes a system that can be built.
    pub fn validate(&self) -> SimResult {
        self.params.timing()?;
        self.system.validate()?;
        if let Some(max_ticks) = self.max_ticks {
            if max_ticks <= 0 {
                return sim_error!("max_ticks must be positive, not {}", max_ticks);
            }
        }
        Ok(())
    }
}

/// Configuration given on the command line.
#[derive(Args, Clone, Debug, Default)]
pub struct Overrides {
    /// Number of devices. Their address ranges are found by splitting the
    /// span of the configured device ranges evenly. More than one device
    /// implies a switch.
    #[arg(long)]
    pub num_devices: Option<usize>,

    /// Put a switch between the host and the devices.
    #[arg(long)]
    pub use_switch: Option<bool>,

    /// Size of every transmit and receive virtual channel.
    #[arg(long)]
    pub vc_size: Option<usize>,

    /// Skip operations that cannot make progress.
    #[arg(long)]
    pub skip_cycle: Option<bool>,

    /// Report a deadlock if the trace has not completed by this tick.
    #[arg(long)]
    pub max_ticks: Option<Tick>,

    /// Write the per-table latency averages to this CSV file.
    #[arg(long)]
    pub latency_file: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(&self, config: &mut SimConfig) {
        if let Some(num_devices) = self.num_devices {
            let system = &mut config.system;
            if num_devices != system.num_devices {
                if let Some(span) = span_of(&system.device_intervals) {
                    system.device_intervals = split_interval(span, num_devices);
                }
            }
            system.num_devices = num_devices;
            if num_devices > 1 {
                system.use_switch = true;
            }
        }
        if let Some(use_switch) = self.use_switch {
            config.system.use_switch = use_switch;
        }
        if let Some(vc_size) = self.vc_size {
            config.system.host.vc_size = vc_size;
            config.system.host.rx_vc_size = vc_size;
            config.system.device.vc_size = vc_size;
        }
        if let Some(skip_cycle) = self.skip_cycle {
            config.skip_cycle = skip_cycle;
        }
        if self.max_ticks.is_some() {
            config.max_ticks = self.max_ticks;
        }
        if self.latency_file.is_some() {
            config.latency_file = self.latency_file.clone();
        }
    }
}

/// Smallest half-open range covering every interval.
fn span_of(intervals: &[(u64, u64)]) -> Option<(u64, u64)> {
    let start = intervals.iter().map(|i| i.0).min()?;
    let end = intervals.iter().map(|i| i.1).max()?;
    Some((start, end))
}

/// Split `[start, end)` into `n` contiguous ranges. The last one absorbs the
/// remainder. An inverted span is passed through for `validate` to reject.
fn split_interval((start, end): (u64, u64), n: usize) -> Vec<(u64, u64)> {
    if n == 0 {
        return Vec::new();
    }
    let size = end.saturating_sub(start) / n as u64;
    (0..n as u64)
        .map(|i| {
            let lo = start + i * size;
            let hi = if i + 1 == n as u64 { end } else { lo + size };
            (lo, hi)
        })
        .collect()
}
