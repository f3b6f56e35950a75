// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Trackers for tests.
//!
//! [`create_tracker`] gives each test file its own log under `traces/`.
//! [`RecordingTracker`] keeps messages in memory so a test can check them with
//! [`expect_lines`].

use std::cell::RefCell;
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::rc::Rc;

use regex::Regex;

use crate::tracker::{LevelFilter, TextTracker};
use crate::{Track, Tracker};

/// Folder holding the logs written by tests.
pub const TRACE_FOLDER: &str = "traces";

/// Keeps every message, formatted as `<path>:<LEVEL>: <message>`.
#[derive(Default)]
pub struct RecordingTracker {
    lines: RefCell<Vec<String>>,
}

impl Track for RecordingTracker {
    fn level_for(&self, _path: &str) -> Option<log::Level> {
        Some(log::Level::Trace)
    }

    fn log(&self, path: &str, level: log::Level, msg: fmt::Arguments) {
        self.lines.borrow_mut().push(format!("{path}:{level}: {msg}"));
    }

    fn set_tick(&self, _tick: i64) {}

    fn shutdown(&self) {}
}

/// A [`RecordingTracker`] and the same tracker as a [`Tracker`].
#[must_use]
pub fn recording_tracker() -> (Rc<RecordingTracker>, Tracker) {
    let recorder = Rc::new(RecordingTracker::default());
    let tracker: Tracker = recorder.clone();
    (recorder, tracker)
}

/// Assert that the lines recorded since the last call match `expected`, one
/// regular expression per line, then forget them.
pub fn expect_lines(recorder: &RecordingTracker, expected: &[&str]) {
    let lines = recorder.lines.take();
    assert_eq!(
        lines.len(),
        expected.len(),
        "Recorded {lines:?}, expected {expected:?}"
    );
    for (line, pattern) in lines.iter().zip(expected) {
        let regex = Regex::new(pattern).unwrap();
        assert!(regex.is_match(line), "'{line}' does not match '{pattern}'");
    }
}

/// A tracker writing debug messages to `traces/<stem>.log`, where `<stem>` is
/// the file name of `full_filepath` without its extension. Pass `file!()`.
#[must_use]
pub fn create_tracker(full_filepath: &str) -> Tracker {
    fs::create_dir_all(TRACE_FOLDER).unwrap();
    let stem = Path::new(full_filepath)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap();
    let file = File::create(Path::new(TRACE_FOLDER).join(format!("{stem}.log"))).unwrap();
    Rc::new(TextTracker::new(
        LevelFilter::new(log::Level::Debug),
        Box::new(BufWriter::new(file)),
    ))
}
