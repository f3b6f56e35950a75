// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Named, hierarchical owners of log messages.

use std::fmt;
use std::rc::Rc;

use crate::Tracker;

const SEPARATOR: &str = "::";

/// A component's handle on the tracker.
///
/// The path of an entity is its parent's path followed by its own name. The
/// level is resolved once, when the entity is built, so later changes to the
/// tracker's filters do not affect existing entities.
pub struct Entity {
    /// Local name, e.g. `packer`.
    pub name: String,

    path: String,

    /// Most verbose level this entity emits, `None` when it is silent.
    max_level: Option<log::Level>,

    /// Receiver of this entity's messages.
    pub tracker: Tracker,
}

impl Entity {
    /// Create a child of `parent` sharing its tracker.
    #[must_use]
    pub fn new(parent: &Entity, name: &str) -> Self {
        let path = format!("{}{SEPARATOR}{name}", parent.path);
        Self::with_path(&parent.tracker, name, path)
    }

    fn with_path(tracker: &Tracker, name: &str, path: String) -> Self {
        let max_level = tracker.level_for(&path);
        Self {
            name: name.to_string(),
            path,
            max_level,
            tracker: tracker.clone(),
        }
    }

    /// The full hierarchical name.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a message at `level` would be emitted.
    #[must_use]
    pub fn is_enabled(&self, level: log::Level) -> bool {
        self.max_level.is_some_and(|max| level <= max)
    }

    /// Pass a message to the tracker. Use the level macros rather than calling
    /// this directly so that disabled messages are not formatted.
    pub fn log(&self, level: log::Level, msg: fmt::Arguments) {
        self.tracker.log(&self.path, level, msg);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("path", &self.path)
            .field("max_level", &self.max_level)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Create the root of an entity hierarchy.
pub fn toplevel(tracker: &Tracker, name: &str) -> Rc<Entity> {
    Rc::new(Entity::with_path(tracker, name, name.to_string()))
}

/// Implemented by every component that owns an [`Entity`].
pub trait GetEntity {
    /// The component's entity.
    fn entity(&self) -> &Rc<Entity>;
}
