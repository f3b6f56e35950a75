// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A bounded FIFO.
//!
//! Callers are expected to check [`Buffer::is_full`] or [`Buffer::is_empty`]
//! before moving data. Enqueueing onto a full buffer or reading from an empty
//! one means flow control has failed and is reported as a [`SimError`].

use std::collections::VecDeque;

use cxl_engine::sim_error;
use cxl_engine::types::{SimError, SimResult, Tick};

#[derive(Clone, Debug)]
pub struct Buffer<T> {
    capacity: usize,
    queue: VecDeque<T>,
}

impl<T> Buffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn enqueue(&mut self, value: T) -> SimResult {
        if self.is_full() {
            return sim_error!("Adding to already full buffer");
        }
        self.queue.push_back(value);
        Ok(())
    }

    pub fn dequeue(&mut self) -> Result<T, SimError> {
        match self.queue.pop_front() {
            Some(value) => Ok(value),
            None => sim_error!("Dequeuing from already empty buffer"),
        }
    }

    pub fn head(&self) -> Result<&T, SimError> {
        match self.queue.front() {
            Some(value) => Ok(value),
            None => sim_error!("Fetching from empty buffer"),
        }
    }

    /// The head, if there is one.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.queue.front()
    }

    /// True if there is a head and it has been resident for at least `floor`
    /// ticks, measured from the tick returned by `stamp`.
    pub fn head_resident_for<F>(&self, now: Tick, floor: Tick, stamp: F) -> bool
    where
        F: Fn(&T) -> Tick,
    {
        self.queue
            .front()
            .is_some_and(|head| now - stamp(head) >= floor)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.queue.iter()
    }
}
