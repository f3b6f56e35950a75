// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Build the trackers selected on the command line.

use std::fs::File;
use std::io::{self, BufWriter};
use std::rc::Rc;

use crate::tracker::{LevelFilter, MultiTracker, TextTracker, TrackConfigError};
use crate::{Tracker, Writer};

/// Settings of one output.
pub struct TrackerConfig<'a> {
    /// Whether this output is used.
    pub enable: bool,

    /// Level applied to the selected entities.
    pub level: log::Level,

    /// Selects the entities that get `level`. When set, all other entities
    /// only report errors. When empty, `level` applies to every entity.
    pub filter_regex: &'a str,

    /// Destination file, for outputs that write to one.
    pub file: Option<&'a str>,
}

impl Default for TrackerConfig<'_> {
    fn default() -> Self {
        Self {
            enable: true,
            level: log::Level::Warn,
            filter_regex: "",
            file: None,
        }
    }
}

/// Settings of all outputs.
pub struct TrackersConfig<'a> {
    /// The console.
    pub stdout: TrackerConfig<'a>,

    /// A text log file.
    pub log_file: TrackerConfig<'a>,
}

fn level_filter(config: &TrackerConfig) -> Result<LevelFilter, TrackConfigError> {
    if config.filter_regex.is_empty() {
        return Ok(LevelFilter::new(config.level));
    }
    let mut filter = LevelFilter::new(log::Level::Error);
    filter.add_rule(config.filter_regex, config.level)?;
    Ok(filter)
}

fn stdout_output(config: &TrackerConfig) -> Result<Tracker, TrackConfigError> {
    let writer: Writer = Box::new(BufWriter::new(io::stdout()));
    Ok(Rc::new(TextTracker::new(level_filter(config)?, writer)))
}

fn file_output(config: &TrackerConfig) -> Result<Tracker, TrackConfigError> {
    let path = config
        .file
        .ok_or_else(|| TrackConfigError("The log file output needs a file name".to_string()))?;
    let file = File::create(path)
        .map_err(|e| TrackConfigError(format!("Unable to create log file '{path}': {e}")))?;
    let writer: Writer = Box::new(BufWriter::new(file));
    Ok(Rc::new(TextTracker::new(level_filter(config)?, writer)))
}

/// Build a [`Tracker`] for the enabled outputs.
///
/// With no output enabled, warnings and errors still go to the console.
pub fn setup_trackers(config: &TrackersConfig) -> Result<Tracker, TrackConfigError> {
    match (config.stdout.enable, config.log_file.enable) {
        (true, true) => {
            let mut both = MultiTracker::default();
            both.add_tracker(stdout_output(&config.stdout)?);
            both.add_tracker(file_output(&config.log_file)?);
            Ok(Rc::new(both))
        }
        (true, false) => stdout_output(&config.stdout),
        (false, true) => file_output(&config.log_file),
        (false, false) => stdout_output(&TrackerConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, toplevel};
    use crate::{debug, warn};

    fn file_only<'a>(file: &'a str, filter_regex: &'a str) -> TrackersConfig<'a> {
        TrackersConfig {
            stdout: TrackerConfig {
                enable: false,
                ..TrackerConfig::default()
            },
            log_file: TrackerConfig {
                enable: true,
                level: log::Level::Debug,
                filter_regex,
                file: Some(file),
            },
        }
    }

    #[test]
    fn log_file_lines_carry_tick_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let tracker = setup_trackers(&file_only(path.to_str().unwrap(), "")).unwrap();

        let top = toplevel(&tracker, "top");
        let host = Entity::new(&top, "host0");
        tracker.set_tick(37);
        warn!(host ; "no credit for {}", "device1");
        tracker.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "      37 WARN  top::host0: no credit for device1\n"
        );
    }

    #[test]
    fn filter_limits_other_entities_to_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let tracker = setup_trackers(&file_only(path.to_str().unwrap(), "bus")).unwrap();

        let top = toplevel(&tracker, "top");
        let bus = Entity::new(&top, "bus0");
        let switch = Entity::new(&top, "switch");
        assert!(bus.is_enabled(log::Level::Debug));
        assert!(!switch.is_enabled(log::Level::Warn));

        debug!(bus ; "flit in flight");
        debug!(switch ; "dropped");
        tracker.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("top::bus0: flit in flight"));
    }

    #[test]
    fn log_file_needs_a_name() {
        let config = TrackersConfig {
            stdout: TrackerConfig {
                enable: false,
                ..TrackerConfig::default()
            },
            log_file: TrackerConfig::default(),
        };
        let err = setup_trackers(&config).err().unwrap();
        assert_eq!(err.0, "The log file output needs a file name");
    }
}
