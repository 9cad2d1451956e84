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

#![deny(missing_docs, missing_debug_implementations)]

//! # CclSim
//!
//! This is a library for simulating policy-driven collective-communication traffic at packet
//! level, over a directed network of GPUs and store-and-forward switches.
//!
//! ## Main Concepts
//!
//! The [`sim::Simulator`] is the main datastructure to operate on. It holds the devices
//! ([`node::Node`], either a GPU or a switch) and how they are connected, on a graph (see
//! [Petgraph](https://docs.rs/petgraph/latest/petgraph/index.html)); every directed link is
//! materialized as an output [`port::Port`] on its source device.
//!
//! Traffic is described by transmission rules ([`policy::PolicyEntry`]): move one chunk of
//! data from one GPU to another along a fixed path, optionally no earlier than a release time
//! and only after other chunks arrived at the source. The [`policy::PolicyEngine`] fires the
//! rules as chunks become ready and expands each fired rule into a stream of packets.
//!
//! Time is virtual. Everything that happens is an [`event::Event`] on the single
//! [`event::EventQueue`], ordered by `(time, insertion order)`, so a simulation is
//! deterministic for a fixed input: two runs yield bit-identical result maps. Ports serve one
//! packet at a time, draining their queue-pairs round-robin with a configurable quantum;
//! delivery happens one propagation delay after service completion.
//!
//! After [`sim::Simulator::run`] returns, the per-transmission completion times, the
//! per-transmission first-send times, and the per-(chunk, node) readiness times can be read
//! (or snapshotted with [`sim::Simulator::results`]).
//!
//! ## Example usage
//!
//! The following example builds two GPUs behind a switch and transmits two chunks, the second
//! one only after the first one arrived:
//!
//! ```
//! use cclsim::prelude::*;
//!
//! fn main() -> Result<(), SimError> {
//!     let mut sim = Simulator::new(SimConfig { packet_size_bytes: 1024, header_size_bytes: 0 });
//!
//!     let g0 = sim.add_gpu("GPU0");
//!     let g1 = sim.add_gpu("GPU1");
//!     let sw = sim.add_switch("SW0");
//!
//!     sim.add_link(g0, sw, 100e9, 0.0)?;
//!     sim.add_link(sw, g1, 100e9, 0.0)?;
//!     sim.add_link(g1, sw, 100e9, 0.0)?;
//!     sim.add_link(sw, g0, 100e9, 0.0)?;
//!
//!     sim.load_policy(vec![
//!         PolicyEntry::new("A", g0, g1, 0, Rate::Max, 1 << 20, vec![g0, sw, g1]),
//!         PolicyEntry::new("B", g1, g0, 0, Rate::Max, 1 << 20, vec![g1, sw, g0]).after(["A"]),
//!     ])?;
//!
//!     sim.start()?;
//!     sim.run(None)?;
//!
//!     let a = sim.tx_complete_time()[&TxId::new("A", g0, g1)];
//!     let b = sim.tx_first_send_time()[&TxId::new("B", g1, g0)];
//!     // B starts exactly when A completes at GPU1
//!     assert_eq!(a, b);
//!     Ok(())
//! }
//! ```

pub mod event;
pub mod formatter;
pub mod node;
pub mod policy;
pub mod port;
pub mod prelude;
pub mod sim;
pub mod types;

#[cfg(test)]
mod test;
