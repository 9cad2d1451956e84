// CclSim: Collective-Communication Network Simulator written in Rust
// Copyright (C) 2023-2024 The CclSim developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Module defining events and the virtual-time event queue.
//!
//! The simulation is driven by a single priority queue of [`Event`]s keyed by
//! `(scheduled_time, insertion_seq)`. Ties in time are broken by insertion order, which makes
//! the whole simulation deterministic for a fixed input. Events are plain data; the
//! [`Simulator`](crate::sim::Simulator) owns the dispatch logic. The cooperating "processes" of
//! the model (port drains, rule waiters, the link-rate driver) are state machines that post
//! their own next event.

use std::{cmp::Ordering, collections::BinaryHeap};

use ordered_float::NotNan;

use crate::types::{NodeId, Packet, TxId};

/// Event to handle
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Wake the drain of the port `#0 -> #1` after an empty-to-nonempty transition.
    Drain(NodeId, NodeId),
    /// The port `#0 -> #1` finished serving the packet.
    Served(NodeId, NodeId, Packet),
    /// The packet arrives at node `#0` after propagation.
    Deliver(NodeId, Packet),
    /// Node `#0` finished its processing delay and forwards the packet.
    Forward(NodeId, Packet),
    /// GPU `#0` finished storing; the transmission completes.
    Stored(NodeId, TxId),
    /// Evaluate the time and dependency gates of the rule with the given install index.
    Trigger(usize),
    /// Apply the batch with the given index of the link-rate schedule.
    RateBatch(usize),
}

impl Event {
    /// Return the node at which the event takes place, if any. Rule triggers and rate batches
    /// are not localized at a single node.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Event::Drain(u, _) | Event::Served(u, _, _) => Some(*u),
            Event::Deliver(n, _) | Event::Forward(n, _) | Event::Stored(n, _) => Some(*n),
            Event::Trigger(_) | Event::RateBatch(_) => None,
        }
    }

    /// Returns the packet carried by the event, if any.
    pub fn packet(&self) -> Option<&Packet> {
        match self {
            Event::Served(_, _, p) | Event::Deliver(_, p) | Event::Forward(_, p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    time: NotNan<f64>,
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

// `BinaryHeap` is a max-heap; reverse the comparison so the earliest (time, seq) pops first.
impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Virtual-time event queue.
///
/// The clock advances only when an event is popped; it never moves backwards. Scheduling with a
/// delay of zero places the event at the current instant, strictly after every event already
/// queued for that instant.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    seq: u64,
    time: NotNan<f64>,
}

impl EventQueue {
    /// Create a new empty event queue with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event `delay` seconds after the current virtual time. `delay` must be finite
    /// and non-negative; callers validate their delays at the input boundary.
    pub fn push_after(&mut self, delay: f64, event: Event) {
        debug_assert!(delay >= 0.0);
        let time = self.time + NotNan::new(delay).unwrap();
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(QueuedEvent { time, seq, event });
    }

    /// Pop the earliest pending event and advance the clock to its scheduled time.
    pub fn pop(&mut self) -> Option<Event> {
        let entry = self.heap.pop()?;
        self.time = entry.time;
        Some(entry.event)
    }

    /// Scheduled time of the earliest pending event.
    pub fn peek_time(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.time.into_inner())
    }

    /// Move the clock forward to `time` without executing anything. Used to truncate a run at
    /// a given instant; a `time` in the past is ignored.
    pub fn advance_to(&mut self, time: f64) {
        let time = NotNan::new(time).unwrap();
        if time > self.time {
            self.time = time;
        }
    }

    /// Get the number of enqueued events
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Return `true` if no event is enqueued.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove all events from the queue. The clock is left untouched.
    pub fn clear(&mut self) {
        self.heap.clear()
    }

    /// Get the current virtual time in seconds.
    pub fn now(&self) -> f64 {
        self.time.into_inner()
    }
}
