// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The [`Track`] interface and its implementations.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufWriter};
use std::rc::Rc;

use regex::Regex;

mod dev_null;
mod multi_tracker;
mod text;

pub use dev_null::DevNullTracker;
pub use multi_tracker::MultiTracker;
pub use text::TextTracker;

/// A tracker could not be configured.
#[derive(Debug)]
pub struct TrackConfigError(pub String);

impl fmt::Display for TrackConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TrackConfigError {}

/// Receiver of log messages.
pub trait Track {
    /// The most verbose level enabled for the entity at `path`.
    fn level_for(&self, path: &str) -> Option<log::Level>;

    /// Record a message from the entity at `path`.
    fn log(&self, path: &str, level: log::Level, msg: fmt::Arguments);

    /// Set the tick stamped on subsequent messages.
    fn set_tick(&self, tick: i64);

    /// Flush any buffered output.
    fn shutdown(&self);
}

/// A tracker shared by all entities of a simulation.
pub type Tracker = Rc<dyn Track>;

/// A [`Tracker`] printing messages up to `level` on stdout.
#[must_use]
pub fn stdout_tracker(level: log::Level) -> Tracker {
    Rc::new(TextTracker::new(
        LevelFilter::new(level),
        Box::new(BufWriter::new(io::stdout())),
    ))
}

/// A [`Tracker`] that drops everything.
#[must_use]
pub fn dev_null_tracker() -> Tracker {
    Rc::new(DevNullTracker)
}

/// Maps entity paths to log levels.
///
/// Rules are tried in the order they were added and the first whose regular
/// expression matches the path wins. Paths matching no rule get the default
/// level. Results are cached per path.
pub struct LevelFilter {
    default_level: log::Level,
    rules: Vec<(Regex, log::Level)>,
    resolved: RefCell<HashMap<String, log::Level>>,
}

impl LevelFilter {
    /// A filter giving every entity `default_level`.
    #[must_use]
    pub fn new(default_level: log::Level) -> Self {
        Self {
            default_level,
            rules: Vec::new(),
            resolved: RefCell::new(HashMap::new()),
        }
    }

    /// Give entities whose path matches `pattern` the level `level`.
    ///
    /// ```rust
    /// use cxl_track::tracker::LevelFilter;
    ///
    /// let mut filter = LevelFilter::new(log::Level::Warn);
    /// filter.add_rule(r"::device\d+::packer$", log::Level::Trace).unwrap();
    /// assert_eq!(filter.level("top::device3::packer"), log::Level::Trace);
    /// assert_eq!(filter.level("top::host0::packer"), log::Level::Warn);
    /// ```
    pub fn add_rule(&mut self, pattern: &str, level: log::Level) -> Result<(), TrackConfigError> {
        let regex = Regex::new(pattern)
            .map_err(|e| TrackConfigError(format!("Invalid filter '{pattern}': {e}")))?;
        self.rules.push((regex, level));
        self.resolved.borrow_mut().clear();
        Ok(())
    }

    /// The level of the entity at `path`.
    #[must_use]
    pub fn level(&self, path: &str) -> log::Level {
        if let Some(level) = self.resolved.borrow().get(path) {
            return *level;
        }
        let level = self
            .rules
            .iter()
            .find(|(regex, _)| regex.is_match(path))
            .map_or(self.default_level, |(_, level)| *level);
        self.resolved.borrow_mut().insert(path.to_string(), level);
        level
    }

    /// Whether a message at `level` from `path` passes the filter.
    #[must_use]
    pub fn allows(&self, path: &str, level: log::Level) -> bool {
        level <= self.level(path)
    }
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;

    const PATHS: [&str; 5] = [
        "top",
        "top::host0",
        "top::host0::packer",
        "top::device1::memory",
        "top::bus2",
    ];

    fn levels(filter: &LevelFilter) -> Vec<Level> {
        PATHS.iter().map(|p| filter.level(p)).collect()
    }

    #[test]
    fn default_applies_without_rules() {
        let filter = LevelFilter::new(Level::Info);
        assert_eq!(levels(&filter), vec![Level::Info; 5]);
    }

    #[test]
    fn rule_selects_matching_paths() {
        let mut filter = LevelFilter::new(Level::Error);
        filter.add_rule("host0", Level::Trace).unwrap();
        assert_eq!(
            levels(&filter),
            vec![
                Level::Error,
                Level::Trace,
                Level::Trace,
                Level::Error,
                Level::Error
            ]
        );
        assert!(filter.allows("top::host0::packer", Level::Debug));
        assert!(!filter.allows("top::bus2", Level::Warn));
    }

    #[test]
    fn earlier_rules_win() {
        let mut filter = LevelFilter::new(Level::Error);
        filter.add_rule("packer$", Level::Debug).unwrap();
        filter.add_rule("^top", Level::Warn).unwrap();
        assert_eq!(
            levels(&filter),
            vec![
                Level::Warn,
                Level::Warn,
                Level::Debug,
                Level::Warn,
                Level::Warn
            ]
        );
    }

    #[test]
    fn cache_is_cleared_by_new_rules() {
        let mut filter = LevelFilter::new(Level::Error);
        assert_eq!(filter.level("top::bus2"), Level::Error);
        filter.add_rule("bus", Level::Info).unwrap();
        assert_eq!(filter.level("top::bus2"), Level::Info);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let mut filter = LevelFilter::new(Level::Error);
        let err = filter.add_rule("device[", Level::Warn).unwrap_err();
        assert!(err.0.starts_with("Invalid filter 'device['"));
    }
}
