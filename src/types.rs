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

//! Module containing all type definitions

use petgraph::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) type IndexType = u32;
/// Node Identification (and index into the topology graph)
pub type NodeId = NodeIndex<IndexType>;

/// Topology graph. Each directed edge carries the [`LinkSpec`] it was declared with. The live
/// link spec (the one affected by runtime rate updates) is owned by the port, not the graph.
pub type TopologyGraph = StableGraph<(), LinkSpec, Directed, IndexType>;

/// Identifier of a logical data object (a *chunk*) copied between GPUs.
///
/// Chunk ids are heterogeneous: traffic generators commonly use plain integers, while
/// hand-written policies prefer names. Both variants hash and order consistently, so they can be
/// mixed freely within one simulation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChunkId {
    /// Numeric chunk id
    Num(u64),
    /// Named chunk id
    Name(String),
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkId::Num(x) => write!(f, "{x}"),
            ChunkId::Name(x) => write!(f, "{x}"),
        }
    }
}

impl From<u64> for ChunkId {
    fn from(x: u64) -> Self {
        Self::Num(x)
    }
}

impl From<u32> for ChunkId {
    fn from(x: u32) -> Self {
        Self::Num(x as u64)
    }
}

impl From<usize> for ChunkId {
    fn from(x: usize) -> Self {
        Self::Num(x as u64)
    }
}

impl From<&str> for ChunkId {
    fn from(x: &str) -> Self {
        Self::Name(x.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(x: String) -> Self {
        Self::Name(x)
    }
}

/// Identity of one transmission: one chunk moving from one source GPU to one destination GPU.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId {
    /// The chunk being moved
    pub chunk: ChunkId,
    /// Source GPU
    pub src: NodeId,
    /// Destination GPU
    pub dst: NodeId,
}

impl TxId {
    /// Create a new transmission identity.
    pub fn new(chunk: impl Into<ChunkId>, src: NodeId, dst: NodeId) -> Self {
        Self {
            chunk: chunk.into(),
            src,
            dst,
        }
    }
}

/// Attributes of one directed link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Line rate in bits per second. Strictly positive.
    pub link_rate_bps: f64,
    /// Propagation delay in seconds. Non-negative.
    pub prop_delay: f64,
}

impl LinkSpec {
    /// Create a new link spec.
    pub fn new(link_rate_bps: f64, prop_delay: f64) -> Self {
        Self {
            link_rate_bps,
            prop_delay,
        }
    }
}

/// Per-node timing and scheduling attributes.
///
/// The defaults model an ideal device: a single queue-pair, quantum of one packet, and no
/// processing delays anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Number of queue-pairs on each outbound port of this node (at least 1). Switch-owned
    /// ports always use a single queue-pair, regardless of this setting.
    pub num_qps: usize,
    /// Round-robin quantum: maximum consecutive packets served from one queue-pair (at least 1).
    pub quantum_packets: usize,
    /// Per-packet transmit processing delay in seconds.
    pub tx_proc_delay: f64,
    /// Per-packet switch processing delay in seconds. Only observed by switches.
    pub sw_proc_delay: f64,
    /// Delay between the arrival of the last packet of a transmission and the chunk becoming
    /// available. Only observed by terminal GPUs.
    pub gpu_store_delay: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            num_qps: 1,
            quantum_packets: 1,
            tx_proc_delay: 0.0,
            sw_proc_delay: 0.0,
            gpu_store_delay: 0.0,
        }
    }
}

/// Global simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Size of a full packet in bytes. The last packet of a transmission may be shorter.
    pub packet_size_bytes: u64,
    /// Per-packet header overhead in bytes, charged on every hop's service time.
    pub header_size_bytes: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            packet_size_bytes: 1500,
            header_size_bytes: 0,
        }
    }
}

/// The unit of transfer. Packets are created by the policy engine when a rule fires and move
/// along their path as single-owner values; the only mutation during forwarding is the
/// [`Packet::advance`] of the hop index.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Identity of the transmission this packet belongs to
    pub tx: TxId,
    /// Sequence number within the transmission, starting at 0
    pub seq: u64,
    /// Total number of packets of the transmission
    pub total_packets: u64,
    /// Payload size in bytes
    pub size_bytes: u64,
    /// The fixed path from source to destination
    pub path: Vec<NodeId>,
    /// Index of the current node in `path`
    pub hop_idx: usize,
    /// Queue-pair lane this packet is scheduled on
    pub qpid: usize,
    /// Requested transmission rate in bits per second (ignored if `use_max_rate`)
    pub rate_bps: f64,
    /// Whether the packet is served at the full line rate of each traversed link
    pub use_max_rate: bool,
    /// Virtual time at which the policy engine created this packet
    pub created_time: f64,
}

impl Packet {
    /// The next node along the path, or `None` if the packet is at its final hop.
    pub fn next_hop(&self) -> Option<NodeId> {
        self.path.get(self.hop_idx + 1).copied()
    }

    /// Advance the packet to the next hop.
    pub fn advance(&mut self) {
        self.hop_idx += 1;
    }

    /// Payload size in bits.
    pub fn bits(&self) -> u64 {
        self.size_bytes * 8
    }
}

/// Simulation Errors
#[derive(Error, Debug)]
pub enum SimError {
    /// The topology under construction is inconsistent: bad edge attributes or a duplicate link.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    /// A policy entry failed validation at install (or an initial chunk source is not a GPU).
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    /// Non-finite or non-positive rate, at construction, during service, or at a schedule update.
    #[error("invalid rate {rate} on link {src:?} -> {dst:?}")]
    InvalidRate {
        /// Owner of the port
        src: NodeId,
        /// Next hop of the port
        dst: NodeId,
        /// The offending rate in bits per second
        rate: f64,
    },
    /// A packet's next hop has no port at its current node.
    #[error("{at:?} has no port towards {next_hop:?}")]
    NoRoute {
        /// The node holding the packet
        at: NodeId,
        /// The unreachable next hop
        next_hop: NodeId,
    },
    /// Reference to a node id that was never declared.
    #[error("unknown node: {0:?}")]
    UnknownNode(NodeId),
    /// The configured event limit was reached before the queue drained.
    #[error("event limit of {0} events exceeded")]
    EventLimitExceeded(usize),
    /// Json error
    #[error("{0}")]
    JsonError(Box<serde_json::Error>),
}

impl From<serde_json::Error> for SimError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonError(Box::new(value))
    }
}

impl PartialEq for SimError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidTopology(l0), Self::InvalidTopology(r0)) => l0 == r0,
            (Self::InvalidPolicy(l0), Self::InvalidPolicy(r0)) => l0 == r0,
            (
                Self::InvalidRate {
                    src: ls,
                    dst: ld,
                    rate: lr,
                },
                Self::InvalidRate {
                    src: rs,
                    dst: rd,
                    rate: rr,
                },
            ) => ls == rs && ld == rd && lr == rr,
            (
                Self::NoRoute {
                    at: la,
                    next_hop: ln,
                },
                Self::NoRoute {
                    at: ra,
                    next_hop: rn,
                },
            ) => la == ra && ln == rn,
            (Self::UnknownNode(l0), Self::UnknownNode(r0)) => l0 == r0,
            (Self::EventLimitExceeded(l0), Self::EventLimitExceeded(r0)) => l0 == r0,
            (Self::JsonError(l), Self::JsonError(r)) => l.to_string() == r.to_string(),
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}
