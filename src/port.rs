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

//! Module defining the output port of a directed link.
//!
//! One [`Port`] models one directed link: a single server that transmits one packet at a time,
//! fed by `num_qps` FIFO queues that are drained round-robin with a configurable quantum. The
//! port itself is a passive state machine; the simulator drives it with
//! [`Port::start_service`] / [`Port::finish_service`] and turns the returned delays into
//! events.

use std::collections::VecDeque;

use crate::types::{LinkSpec, NodeId, Packet, SimError};

/// Position of the round-robin scan inside one queue visit. The visit survives across service
/// completions so that the quantum counts consecutive packets, not wake-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Visit {
    qp: usize,
    served: usize,
}

/// One directed output link with per-queue-pair FIFOs.
#[derive(Debug)]
pub struct Port {
    owner: NodeId,
    next_hop: NodeId,
    link: LinkSpec,
    num_qps: usize,
    quantum_packets: usize,
    tx_proc_delay: f64,
    header_size_bytes: u64,
    queues: Vec<VecDeque<Packet>>,
    rr: usize,
    queued: usize,
    visit: Option<Visit>,
    /// Whether a drain activity is in flight. Only an empty-to-nonempty enqueue arms a new one.
    active: bool,
}

impl Port {
    pub(crate) fn new(
        owner: NodeId,
        next_hop: NodeId,
        link: LinkSpec,
        num_qps: usize,
        quantum_packets: usize,
        tx_proc_delay: f64,
        header_size_bytes: u64,
    ) -> Self {
        let num_qps = num_qps.max(1);
        Self {
            owner,
            next_hop,
            link,
            num_qps,
            quantum_packets: quantum_packets.max(1),
            tx_proc_delay: tx_proc_delay.max(0.0),
            header_size_bytes,
            queues: (0..num_qps).map(|_| VecDeque::new()).collect(),
            rr: 0,
            queued: 0,
            visit: None,
            active: false,
        }
    }

    /// The node owning this port.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// The node this port transmits towards.
    pub fn next_hop(&self) -> NodeId {
        self.next_hop
    }

    /// The current link spec.
    pub fn link(&self) -> LinkSpec {
        self.link
    }

    /// Number of queue-pairs of this port.
    pub fn num_qps(&self) -> usize {
        self.num_qps
    }

    /// Total number of packets currently queued (not counting a packet in service).
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Returns `true` if no drain activity is in flight.
    pub fn is_idle(&self) -> bool {
        !self.active
    }

    /// Update this directed link's line rate at runtime.
    ///
    /// Affects packets whose service starts after this update. A packet already in service
    /// keeps its previously computed service time. The propagation delay is kept.
    pub fn set_link_rate(&mut self, new_rate_bps: f64) -> Result<(), SimError> {
        if !new_rate_bps.is_finite() || new_rate_bps <= 0.0 {
            return Err(SimError::InvalidRate {
                src: self.owner,
                dst: self.next_hop,
                rate: new_rate_bps,
            });
        }
        self.link = LinkSpec::new(new_rate_bps, self.link.prop_delay);
        Ok(())
    }

    /// Append a packet to its queue-pair. Returns `true` if the caller must arm the drain
    /// activity (the port was idle). Enqueue is O(1) and never blocks.
    pub(crate) fn enqueue(&mut self, pkt: Packet) -> bool {
        let qp = pkt.qpid % self.num_qps;
        self.queues[qp].push_back(pkt);
        self.queued += 1;
        if self.active {
            false
        } else {
            self.active = true;
            true
        }
    }

    /// Time this port spends transmitting `pkt`, in seconds.
    pub(crate) fn service_time(&self, pkt: &Packet) -> Result<f64, SimError> {
        let link_rate = self.link.link_rate_bps;
        if link_rate <= 0.0 {
            return Err(SimError::InvalidRate {
                src: self.owner,
                dst: self.next_hop,
                rate: link_rate,
            });
        }
        let eff = if pkt.use_max_rate {
            link_rate
        } else {
            if pkt.rate_bps <= 0.0 {
                return Err(SimError::InvalidRate {
                    src: self.owner,
                    dst: self.next_hop,
                    rate: pkt.rate_bps,
                });
            }
            pkt.rate_bps.min(link_rate)
        };
        let total_bits = (pkt.size_bytes + self.header_size_bytes) * 8;
        Ok(total_bits as f64 / eff)
    }

    /// Begin serving the next packet, if any.
    ///
    /// Selects the queue-pair according to the round-robin discipline: the current visit
    /// continues as long as its queue has data and the quantum is not exhausted; otherwise the
    /// cursor advances to the next non-empty queue (skipping empty ones, wrapping around). The
    /// returned delay covers the transmit processing delay plus the service time; the caller
    /// must call [`Port::finish_service`] once it elapses. Returns `None` and disarms the drain
    /// when every queue is empty.
    pub(crate) fn start_service(&mut self) -> Result<Option<(Packet, f64)>, SimError> {
        let qp = match self.visit {
            Some(Visit { qp, served })
                if served < self.quantum_packets && !self.queues[qp].is_empty() =>
            {
                qp
            }
            _ => {
                // the visit is over; the cursor moves past the visited queue
                if let Some(Visit { qp, .. }) = self.visit.take() {
                    self.rr = (qp + 1) % self.num_qps;
                }
                match self.next_non_empty() {
                    Some(qp) => {
                        self.visit = Some(Visit { qp, served: 0 });
                        qp
                    }
                    None => {
                        self.active = false;
                        return Ok(None);
                    }
                }
            }
        };

        let pkt = self.queues[qp].pop_front().expect("selected qp is non-empty");
        self.queued -= 1;
        let delay = self.tx_proc_delay + self.service_time(&pkt)?;
        Ok(Some((pkt, delay)))
    }

    /// Account for a completed service within the current visit.
    pub(crate) fn finish_service(&mut self) {
        if let Some(visit) = self.visit.as_mut() {
            visit.served += 1;
        }
    }

    fn next_non_empty(&self) -> Option<usize> {
        (0..self.num_qps)
            .map(|i| (self.rr + i) % self.num_qps)
            .find(|&qp| !self.queues[qp].is_empty())
    }
}
