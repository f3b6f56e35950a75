// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::Write;

use crate::Writer;
use crate::tracker::{LevelFilter, Track};

/// Writes one line per message:
///
/// ```text
///     1204 DEBUG top::device0::unpacker: flit #17 unpacked
/// ```
///
/// The first column is the tick at which the message was emitted.
pub struct TextTracker {
    filter: LevelFilter,
    writer: RefCell<Writer>,
    tick: Cell<i64>,
}

impl TextTracker {
    /// Create a tracker writing the messages `filter` allows to `writer`.
    #[must_use]
    pub fn new(filter: LevelFilter, writer: Writer) -> Self {
        Self {
            filter,
            writer: RefCell::new(writer),
            tick: Cell::new(0),
        }
    }
}

impl Track for TextTracker {
    fn level_for(&self, path: &str) -> Option<log::Level> {
        Some(self.filter.level(path))
    }

    fn log(&self, path: &str, level: log::Level, msg: fmt::Arguments) {
        // A failed write must not change the simulation
        let _ = writeln!(
            self.writer.borrow_mut(),
            "{:>8} {:<5} {path}: {msg}",
            self.tick.get(),
            level
        );
    }

    fn set_tick(&self, tick: i64) {
        self.tick.set(tick);
    }

    fn shutdown(&self) {
        let _ = self.writer.borrow_mut().flush();
    }
}
