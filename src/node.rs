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

//! Module defining the network devices: GPUs and switches.
//!
//! Both device kinds share the forwarding surface (a map of outbound [`Port`]s, one per
//! directed link) and differ on receive: a switch always forwards, while a GPU terminates
//! transmissions addressed to it, counting arrivals and signalling chunk readiness. A GPU that
//! is not the destination of a packet relays it exactly like a switch would.

use std::collections::{HashMap, HashSet};

use crate::{
    port::Port,
    types::{ChunkId, LinkSpec, NodeConfig, NodeId, Packet, SimError, TxId},
};

/// State only GPUs carry: chunk ownership and per-transmission arrival counters.
#[derive(Debug, Default)]
pub struct GpuState {
    pub(crate) have_chunk: HashSet<ChunkId>,
    pub(crate) rx_count: HashMap<TxId, u64>,
}

/// The two device kinds of the topology.
#[derive(Debug)]
pub enum NodeKind {
    /// A compute endpoint. Terminates transmissions and owns chunks.
    Gpu(GpuState),
    /// A store-and-forward switch. Stateless apart from its ports.
    Switch,
}

/// One network device together with its outbound ports.
#[derive(Debug)]
pub struct Node {
    name: String,
    id: NodeId,
    cfg: NodeConfig,
    kind: NodeKind,
    ports: HashMap<NodeId, Port>,
}

impl Node {
    pub(crate) fn new_gpu(name: String, id: NodeId, cfg: NodeConfig) -> Self {
        Self {
            name,
            id,
            cfg,
            kind: NodeKind::Gpu(GpuState::default()),
            ports: HashMap::new(),
        }
    }

    pub(crate) fn new_switch(name: String, id: NodeId, cfg: NodeConfig) -> Self {
        Self {
            name,
            id,
            cfg,
            kind: NodeKind::Switch,
            ports: HashMap::new(),
        }
    }

    /// Name of the node
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the node
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's timing and scheduling attributes.
    pub fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    /// The device kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns `true` if the node is a GPU.
    pub fn is_gpu(&self) -> bool {
        matches!(self.kind, NodeKind::Gpu(_))
    }

    /// Returns `true` if this node is a GPU that owns the given chunk.
    pub fn owns_chunk(&self, chunk: &ChunkId) -> bool {
        match &self.kind {
            NodeKind::Gpu(state) => state.have_chunk.contains(chunk),
            NodeKind::Switch => false,
        }
    }

    /// The outbound port towards `next_hop`, if it exists.
    pub fn port(&self, next_hop: NodeId) -> Option<&Port> {
        self.ports.get(&next_hop)
    }

    pub(crate) fn port_mut(&mut self, next_hop: NodeId) -> Option<&mut Port> {
        self.ports.get_mut(&next_hop)
    }

    /// Iterate over all outbound ports.
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    /// Create the outbound port towards `next_hop`. Switch-owned ports always use a single
    /// queue-pair with a quantum of one packet.
    pub(crate) fn add_port(&mut self, next_hop: NodeId, link: LinkSpec, header_size_bytes: u64) {
        let (num_qps, quantum) = if self.is_gpu() {
            (self.cfg.num_qps, self.cfg.quantum_packets)
        } else {
            (1, 1)
        };
        self.ports.insert(
            next_hop,
            Port::new(
                self.id,
                next_hop,
                link,
                num_qps,
                quantum,
                self.cfg.tx_proc_delay,
                header_size_bytes,
            ),
        );
    }

    /// Mark a chunk as present on this GPU before the simulation starts.
    pub(crate) fn mark_initial_chunk(&mut self, chunk: ChunkId) {
        if let NodeKind::Gpu(state) = &mut self.kind {
            state.have_chunk.insert(chunk);
        }
    }

    /// Take ownership of a chunk. Returns `false` if the GPU already owned it (or if the node
    /// is a switch).
    pub(crate) fn grant_chunk(&mut self, chunk: ChunkId) -> bool {
        match &mut self.kind {
            NodeKind::Gpu(state) => state.have_chunk.insert(chunk),
            NodeKind::Switch => false,
        }
    }

    /// Count one terminal arrival for `tx` and return the new count.
    pub(crate) fn count_arrival(&mut self, tx: &TxId) -> u64 {
        match &mut self.kind {
            NodeKind::Gpu(state) => {
                let cnt = state.rx_count.entry(tx.clone()).or_insert(0);
                *cnt += 1;
                *cnt
            }
            NodeKind::Switch => 0,
        }
    }

    /// Advance the packet and enqueue it on the outbound port towards its next hop. Returns
    /// the next hop and whether the port's drain must be armed, or `None` if the packet is
    /// already at the end of its path.
    pub(crate) fn send_to_next(
        &mut self,
        mut pkt: Packet,
    ) -> Result<Option<(NodeId, bool)>, SimError> {
        let next = match pkt.next_hop() {
            Some(next) => next,
            None => return Ok(None),
        };
        let port = self.ports.get_mut(&next).ok_or(SimError::NoRoute {
            at: self.id,
            next_hop: next,
        })?;
        pkt.advance();
        let arm = port.enqueue(pkt);
        Ok(Some((next, arm)))
    }
}
