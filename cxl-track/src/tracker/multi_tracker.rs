// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::fmt;

use crate::tracker::{Track, Tracker};

/// Fans messages out to several trackers, e.g. the console and a log file.
///
/// An entity is enabled up to the most verbose level of any child. Each
/// message only reaches the children whose own level admits it.
#[derive(Default)]
pub struct MultiTracker {
    trackers: Vec<Tracker>,
}

impl MultiTracker {
    /// Add a child tracker.
    pub fn add_tracker(&mut self, tracker: Tracker) {
        self.trackers.push(tracker);
    }
}

impl Track for MultiTracker {
    fn level_for(&self, path: &str) -> Option<log::Level> {
        self.trackers
            .iter()
            .filter_map(|tracker| tracker.level_for(path))
            .max()
    }

    fn log(&self, path: &str, level: log::Level, msg: fmt::Arguments) {
        for tracker in &self.trackers {
            if tracker.level_for(path).is_some_and(|max| level <= max) {
                tracker.log(path, level, msg);
            }
        }
    }

    fn set_tick(&self, tick: i64) {
        for tracker in &self.trackers {
            tracker.set_tick(tick);
        }
    }

    fn shutdown(&self) {
        for tracker in &self.trackers {
            tracker.shutdown();
        }
    }
}
