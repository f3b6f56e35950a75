// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A virtual channel holds the messages of one class (for example all M2S
//! requests). It is split into one or more lanes, each a bounded FIFO.
//!
//! Messages are spread over the lanes in round-robin order and drained by
//! scanning the lane heads with a [`LaneCursor`].

use cxl_engine::sim_error;
use cxl_engine::types::{SimError, SimResult};
use cxl_protocols::message::Message;

use crate::arbiter::LaneCursor;
use crate::buffer::Buffer;

pub struct VirtualChannel {
    lanes: Vec<Buffer<Message>>,
    next_lane: usize,
}

impl VirtualChannel {
    /// Create a channel of `num_lanes` lanes each holding `lane_capacity`
    /// messages.
    #[must_use]
    pub fn new(num_lanes: usize, lane_capacity: usize) -> Self {
        Self {
            lanes: (0..num_lanes).map(|_| Buffer::new(lane_capacity)).collect(),
            next_lane: 0,
        }
    }

    /// A single-lane channel.
    #[must_use]
    pub fn single(capacity: usize) -> Self {
        Self::new(1, capacity)
    }

    #[must_use]
    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Total number of messages the channel can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lanes.iter().map(Buffer::capacity).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.iter().map(Buffer::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(Buffer::is_empty)
    }

    /// True when no lane can accept another message.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.lanes.iter().all(Buffer::is_full)
    }

    /// True when the lane the next round-robin enqueue would use is full.
    #[must_use]
    pub fn next_lane_is_full(&self) -> bool {
        self.lanes[self.next_lane].is_full()
    }

    fn advance(&mut self) {
        self.next_lane = (self.next_lane + 1) % self.lanes.len();
    }

    /// Enqueue strictly on the next round-robin lane.
    ///
    /// The caller must have checked [`VirtualChannel::next_lane_is_full`].
    pub fn enqueue_round_robin(&mut self, message: Message) -> SimResult {
        self.lanes[self.next_lane].enqueue(message)?;
        self.advance();
        Ok(())
    }

    /// Enqueue on the first lane with space, starting from the round-robin
    /// lane. Running out of space in every lane means the credit protocol
    /// has failed.
    pub fn enqueue(&mut self, message: Message) -> SimResult {
        for _ in 0..self.lanes.len() {
            let lane = self.next_lane;
            self.advance();
            if !self.lanes[lane].is_full() {
                return self.lanes[lane].enqueue(message);
            }
        }
        sim_error!("Adding {} to already full virtual channel", message)
    }

    #[must_use]
    pub fn lane(&self, lane: usize) -> &Buffer<Message> {
        &self.lanes[lane]
    }

    pub fn lanes(&self) -> impl Iterator<Item = &Buffer<Message>> {
        self.lanes.iter()
    }

    #[must_use]
    pub fn head(&self, lane: usize) -> Option<&Message> {
        self.lanes[lane].peek()
    }

    pub fn dequeue(&mut self, lane: usize) -> Result<Message, SimError> {
        self.lanes[lane].dequeue()
    }

    /// Find the first lane whose head satisfies `eligible`, scanning from the
    /// cursor position.
    pub fn scan<F>(&self, cursor: &mut LaneCursor, mut eligible: F) -> Option<usize>
    where
        F: FnMut(&Message) -> bool,
    {
        cursor.scan(self.lanes.len(), |lane| {
            self.lanes[lane].peek().is_some_and(&mut eligible)
        })
    }

    /// True if any lane head satisfies `predicate`.
    pub fn any_head<F>(&self, predicate: F) -> bool
    where
        F: Fn(&Message) -> bool,
    {
        self.lanes
            .iter()
            .filter_map(Buffer::peek)
            .any(predicate)
    }
}
