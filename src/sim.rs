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

//! # Top-level Simulator module
//!
//! This module holds the topology, the devices, the policy engine, and the event queue, and
//! dispatches every event of the simulation.
//!
//! A [`Simulator`] is built in phases: declare nodes ([`Simulator::add_gpu`],
//! [`Simulator::add_switch`]) and directed links ([`Simulator::add_link`]), install the
//! transmission rules ([`Simulator::load_policy`]) and, optionally, a schedule of link-rate
//! changes ([`Simulator::load_link_rate_schedule`]). [`Simulator::start`] seeds the initial
//! chunk owners and arms the rate driver; [`Simulator::run`] drains the event queue. The
//! result maps are read afterwards.

use std::collections::{HashMap, HashSet};

use log::*;
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{
    event::{Event, EventQueue},
    formatter::SimFormatter,
    node::Node,
    policy::{GateOutcome, PolicyEngine, PolicyEntry},
    types::{
        ChunkId, LinkSpec, NodeConfig, NodeId, Packet, SimConfig, SimError, TopologyGraph, TxId,
    },
};

/// One batch of link-rate updates, applied at a fixed virtual time.
type RateBatch = (f64, Vec<(NodeId, NodeId, f64)>);

/// # Simulator
/// The struct contains the network of GPUs and switches, the installed policy, and all
/// per-transmission results, and executes the discrete-event simulation.
///
/// ```rust
/// use cclsim::prelude::*;
///
/// fn main() -> Result<(), SimError> {
///     let mut sim = Simulator::new(SimConfig { packet_size_bytes: 1024, header_size_bytes: 0 });
///
///     let g0 = sim.add_gpu("GPU0");
///     let g1 = sim.add_gpu("GPU1");
///     sim.add_link(g0, g1, 100e9, 0.0)?;
///
///     // one 1 MiB chunk, at full line rate
///     sim.load_policy(vec![PolicyEntry::new(
///         "A", g0, g1, 0, Rate::Max, 1 << 20, vec![g0, g1],
///     )])?;
///
///     sim.start()?;
///     sim.run(None)?;
///
///     let t = sim.tx_complete_time()[&TxId::new("A", g0, g1)];
///     assert!((t - 8.388608e-5).abs() < 1e-9);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Simulator {
    config: SimConfig,
    topo: TopologyGraph,
    nodes: HashMap<NodeId, Node>,
    names: HashMap<String, NodeId>,
    queue: EventQueue,
    policy: PolicyEngine,
    schedule: Vec<RateBatch>,
    event_limit: Option<usize>,
    tx_registered: HashSet<TxId>,
    tx_complete_time: HashMap<TxId, f64>,
    tx_first_send_time: HashMap<TxId, f64>,
    chunk_ready_time: HashMap<(ChunkId, NodeId), f64>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Simulator {
    /// Generate an empty simulator.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            topo: TopologyGraph::default(),
            nodes: HashMap::new(),
            names: HashMap::new(),
            queue: EventQueue::new(),
            policy: PolicyEngine::new(),
            schedule: Vec::new(),
            event_limit: None,
            tx_registered: HashSet::new(),
            tx_complete_time: HashMap::new(),
            tx_first_send_time: HashMap::new(),
            chunk_ready_time: HashMap::new(),
        }
    }

    /// Add a GPU with the default [`NodeConfig`] and return its id.
    pub fn add_gpu(&mut self, name: impl Into<String>) -> NodeId {
        self.add_gpu_with(name, NodeConfig::default())
    }

    /// Add a GPU with the given [`NodeConfig`] and return its id. The config must be chosen
    /// before any link of this node is added, as ports snapshot it.
    pub fn add_gpu_with(&mut self, name: impl Into<String>, cfg: NodeConfig) -> NodeId {
        let name = name.into();
        let id = self.topo.add_node(());
        self.names.insert(name.clone(), id);
        self.nodes.insert(id, Node::new_gpu(name, id, cfg));
        id
    }

    /// Add a switch with the default [`NodeConfig`] and return its id.
    pub fn add_switch(&mut self, name: impl Into<String>) -> NodeId {
        self.add_switch_with(name, NodeConfig::default())
    }

    /// Add a switch with the given [`NodeConfig`] and return its id.
    pub fn add_switch_with(&mut self, name: impl Into<String>, cfg: NodeConfig) -> NodeId {
        let name = name.into();
        let id = self.topo.add_node(());
        self.names.insert(name.clone(), id);
        self.nodes.insert(id, Node::new_switch(name, id, cfg));
        id
    }

    /// Add the directed link `source -> target` and create the corresponding output port on
    /// `source`. The line rate must be positive and finite, the propagation delay non-negative
    /// and finite, and the link must not already exist.
    pub fn add_link(
        &mut self,
        source: NodeId,
        target: NodeId,
        link_rate_bps: f64,
        prop_delay: f64,
    ) -> Result<(), SimError> {
        for id in [source, target] {
            if !self.nodes.contains_key(&id) {
                return Err(SimError::UnknownNode(id));
            }
        }
        if !link_rate_bps.is_finite() || link_rate_bps <= 0.0 {
            return Err(SimError::InvalidTopology(format!(
                "link {} -> {} needs link_rate_bps > 0, got {link_rate_bps}",
                self.node_name_or(source),
                self.node_name_or(target),
            )));
        }
        if !prop_delay.is_finite() || prop_delay < 0.0 {
            return Err(SimError::InvalidTopology(format!(
                "link {} -> {} needs prop_delay >= 0, got {prop_delay}",
                self.node_name_or(source),
                self.node_name_or(target),
            )));
        }
        if self.topo.find_edge(source, target).is_some() {
            return Err(SimError::InvalidTopology(format!(
                "duplicate link {} -> {}",
                self.node_name_or(source),
                self.node_name_or(target),
            )));
        }

        let link = LinkSpec::new(link_rate_bps, prop_delay);
        self.topo.add_edge(source, target, link);
        self.nodes
            .get_mut(&source)
            .unwrap()
            .add_port(target, link, self.config.header_size_bytes);
        Ok(())
    }

    /// Validate and install transmission rules. Every node referenced by a path must be
    /// declared, and every rule source must be a GPU.
    pub fn load_policy(
        &mut self,
        entries: impl IntoIterator<Item = PolicyEntry>,
    ) -> Result<(), SimError> {
        let entries: Vec<PolicyEntry> = entries.into_iter().collect();
        for entry in &entries {
            for &hop in &entry.path {
                if !self.nodes.contains_key(&hop) {
                    return Err(SimError::UnknownNode(hop));
                }
            }
            if self.nodes.get(&entry.src).is_some_and(|n| !n.is_gpu()) {
                return Err(SimError::InvalidPolicy(format!(
                    "source {} of chunk {} must be a GPU",
                    self.node_name_or(entry.src),
                    entry.chunk
                )));
            }
        }
        self.policy.install(entries)
    }

    /// Load a schedule of link-rate changes: per virtual time, a batch of
    /// `(source, target, new_rate_bps)` updates. The schedule is validated here and armed by
    /// [`Simulator::start`]; at each scheduled instant, the whole batch applies before any
    /// other event at the same instant.
    pub fn load_link_rate_schedule(
        &mut self,
        schedule: impl IntoIterator<Item = RateBatch>,
    ) -> Result<(), SimError> {
        let mut schedule: Vec<RateBatch> = schedule.into_iter().collect();
        for (time, batch) in &schedule {
            if !time.is_finite() || *time < 0.0 {
                return Err(SimError::InvalidTopology(format!(
                    "link-rate schedule time must be finite and >= 0, got {time}"
                )));
            }
            for &(u, v, rate) in batch {
                for id in [u, v] {
                    if !self.nodes.contains_key(&id) {
                        return Err(SimError::UnknownNode(id));
                    }
                }
                if self.topo.find_edge(u, v).is_none() || !rate.is_finite() || rate <= 0.0 {
                    return Err(SimError::InvalidRate {
                        src: u,
                        dst: v,
                        rate,
                    });
                }
            }
        }
        schedule.sort_by_key(|(time, _)| NotNan::new(*time).unwrap());
        self.schedule.extend(schedule);
        Ok(())
    }

    /// Configure the simulator to abort [`Simulator::run`] with
    /// [`SimError::EventLimitExceeded`] after the given number of events. If set to `None`
    /// (the default), the queue runs until drained.
    pub fn set_event_limit(&mut self, limit: Option<usize>) {
        self.event_limit = limit;
    }

    /// Arm the link-rate driver and bootstrap the policy engine: every inferred initial
    /// source GPU is seeded with its chunk, and a synthetic chunk-ready is raised so that the
    /// rules keyed there can fire. Must be called exactly once, before [`Simulator::run`].
    pub fn start(&mut self) -> Result<(), SimError> {
        let now = self.queue.now();
        for (i, (time, _)) in self.schedule.iter().enumerate() {
            self.queue.push_after(time - now, Event::RateBatch(i));
        }

        for (chunk, sources) in self.policy.initial_sources() {
            for src in sources {
                let node = self
                    .nodes
                    .get_mut(&src)
                    .ok_or(SimError::UnknownNode(src))?;
                if !node.is_gpu() {
                    return Err(SimError::InvalidPolicy(format!(
                        "initial source {} for chunk {chunk} must be a GPU",
                        node.name()
                    )));
                }
                debug!("seed chunk {chunk} at {}", node.name());
                node.mark_initial_chunk(chunk.clone());
                for rule in self.policy.on_chunk_ready(src, chunk.clone()) {
                    self.queue.push_after(0.0, Event::Trigger(rule));
                }
            }
        }
        Ok(())
    }

    /// Drive the event loop until the queue is empty or the next event is scheduled at or
    /// after `until`. In the latter case the clock is advanced to `until` and the in-flight
    /// activities are left as they are; a later `run` continues them.
    pub fn run(&mut self, until: Option<f64>) -> Result<(), SimError> {
        let mut processed = 0_usize;
        while let Some(time) = self.queue.peek_time() {
            if let Some(until) = until {
                if time >= until {
                    break;
                }
            }
            if let Some(limit) = self.event_limit {
                if processed >= limit {
                    return Err(SimError::EventLimitExceeded(limit));
                }
            }
            processed += 1;
            self.step()?;
        }
        if let Some(until) = until {
            self.queue.advance_to(until);
        }
        Ok(())
    }

    /// Execute the next event on the queue and return it, or `None` if the queue is empty.
    pub fn step(&mut self) -> Result<Option<Event>, SimError> {
        match self.queue.pop() {
            Some(event) => {
                trace!("t={:.9} {}", self.queue.now(), event.fmt(self));
                self.dispatch(event.clone())?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    // ********************
    // * Event dispatch   *
    // ********************

    fn dispatch(&mut self, event: Event) -> Result<(), SimError> {
        match event {
            Event::Drain(u, v) => self.serve_next(u, v),
            Event::Served(u, v, pkt) => self.served(u, v, pkt),
            Event::Deliver(node, pkt) => self.receive(node, pkt),
            Event::Forward(node, pkt) => self.forward_from(node, pkt),
            Event::Stored(node, tx) => self.complete_tx(node, tx),
            Event::Trigger(rule) => self.trigger_rule(rule),
            Event::RateBatch(i) => self.apply_rate_batch(i),
        }
    }

    /// Begin the next service on the port `u -> v`, if it has queued packets.
    fn serve_next(&mut self, u: NodeId, v: NodeId) -> Result<(), SimError> {
        let started = self
            .nodes
            .get_mut(&u)
            .ok_or(SimError::UnknownNode(u))?
            .port_mut(v)
            .ok_or(SimError::NoRoute { at: u, next_hop: v })?
            .start_service()?;
        if let Some((pkt, delay)) = started {
            self.queue.push_after(delay, Event::Served(u, v, pkt));
        }
        Ok(())
    }

    /// The port `u -> v` finished serving `pkt`: hand the packet over to the link and begin
    /// the next service. With a zero propagation delay the packet is delivered at this very
    /// instant, before the port continues.
    fn served(&mut self, u: NodeId, v: NodeId, pkt: Packet) -> Result<(), SimError> {
        let prop_delay = {
            let port = self
                .nodes
                .get_mut(&u)
                .ok_or(SimError::UnknownNode(u))?
                .port_mut(v)
                .ok_or(SimError::NoRoute { at: u, next_hop: v })?;
            port.finish_service();
            port.link().prop_delay
        };
        if prop_delay > 0.0 {
            self.queue.push_after(prop_delay, Event::Deliver(v, pkt));
        } else {
            self.receive(v, pkt)?;
        }
        self.serve_next(u, v)
    }

    /// A packet arrives at `id`.
    fn receive(&mut self, id: NodeId, pkt: Packet) -> Result<(), SimError> {
        let node = self.nodes.get_mut(&id).ok_or(SimError::UnknownNode(id))?;
        let cfg = *node.config();
        if node.is_gpu() {
            if pkt.tx.dst == id {
                let tx = pkt.tx.clone();
                if node.count_arrival(&tx) < pkt.total_packets {
                    return Ok(());
                }
                if cfg.gpu_store_delay > 0.0 {
                    self.queue
                        .push_after(cfg.gpu_store_delay, Event::Stored(id, tx));
                    return Ok(());
                }
                return self.complete_tx(id, tx);
            }
            // relay GPUs forward like switches, without store delay
            return self.forward_from(id, pkt);
        }
        if cfg.sw_proc_delay > 0.0 {
            self.queue
                .push_after(cfg.sw_proc_delay, Event::Forward(id, pkt));
            return Ok(());
        }
        self.forward_from(id, pkt)
    }

    /// Forward a packet towards its next hop, arming the port drain on an empty-to-nonempty
    /// transition. A packet at the end of its path is dropped.
    fn forward_from(&mut self, id: NodeId, pkt: Packet) -> Result<(), SimError> {
        let sent = self
            .nodes
            .get_mut(&id)
            .ok_or(SimError::UnknownNode(id))?
            .send_to_next(pkt)?;
        if let Some((next, arm)) = sent {
            if arm {
                self.queue.push_after(0.0, Event::Drain(id, next));
            }
        }
        Ok(())
    }

    /// All packets of `tx` arrived (and the store delay elapsed): record the completion time
    /// once per transmission, and raise chunk readiness once per `(chunk, node)`.
    fn complete_tx(&mut self, id: NodeId, tx: TxId) -> Result<(), SimError> {
        let now = self.queue.now();
        debug!("tx {} complete at t={now}", tx.fmt(self));
        self.tx_complete_time.entry(tx.clone()).or_insert(now);

        let node = self.nodes.get_mut(&id).ok_or(SimError::UnknownNode(id))?;
        if node.grant_chunk(tx.chunk.clone()) {
            self.chunk_ready(id, tx.chunk, now);
        }
        Ok(())
    }

    /// A chunk became ready at a node: record the readiness time (write-once) and schedule
    /// the reactions of the policy engine.
    fn chunk_ready(&mut self, id: NodeId, chunk: ChunkId, now: f64) {
        self.chunk_ready_time
            .entry((chunk.clone(), id))
            .or_insert(now);
        for rule in self.policy.on_chunk_ready(id, chunk) {
            self.queue.push_after(0.0, Event::Trigger(rule));
        }
    }

    /// Evaluate the gates of a scheduled rule and fire it if both gates pass.
    fn trigger_rule(&mut self, rule: usize) -> Result<(), SimError> {
        let now = self.queue.now();
        match self.policy.evaluate(rule, now) {
            GateOutcome::WaitUntil(time) => {
                self.queue.push_after(time - now, Event::Trigger(rule));
            }
            GateOutcome::Blocked => {}
            GateOutcome::Fire => {
                let (tx, packets) = self.policy.fire(rule, &self.config, now)?;
                debug!(
                    "fire rule for tx {} with {} packets at t={now}",
                    tx.fmt(self),
                    packets.len()
                );
                self.tx_registered.insert(tx.clone());
                self.tx_first_send_time.entry(tx).or_insert(now);
                for pkt in packets {
                    self.forward_from(pkt.path[pkt.hop_idx], pkt)?;
                }
            }
        }
        Ok(())
    }

    /// Apply one batch of the link-rate schedule.
    fn apply_rate_batch(&mut self, i: usize) -> Result<(), SimError> {
        let batch = self.schedule[i].1.clone();
        for (u, v, rate) in batch {
            self.nodes
                .get_mut(&u)
                .ok_or(SimError::UnknownNode(u))?
                .port_mut(v)
                .ok_or(SimError::NoRoute { at: u, next_hop: v })?
                .set_link_rate(rate)?;
            debug!(
                "link {} -> {} now at {rate} bps",
                self.node_name_or(u),
                self.node_name_or(v)
            );
        }
        Ok(())
    }

    // ********************
    // * Helper Functions *
    // ********************

    fn node_name_or(&self, id: NodeId) -> &str {
        self.nodes.get(&id).map(|n| n.name()).unwrap_or("?")
    }

    /// Returns a reference to the topology graph (PetGraph struct).
    pub fn get_topology(&self) -> &TopologyGraph {
        &self.topo
    }

    /// Returns the number of devices in the topology.
    pub fn num_devices(&self) -> usize {
        self.nodes.len()
    }

    /// Returns a reference to the node, if it exists.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get the NodeId with the given name.
    pub fn get_node_id(&self, name: impl AsRef<str>) -> Option<NodeId> {
        self.names.get(name.as_ref()).copied()
    }

    /// Returns the name of the node, if the id was found.
    pub fn get_node_name(&self, id: NodeId) -> Result<&str, SimError> {
        self.nodes
            .get(&id)
            .map(|n| n.name())
            .ok_or(SimError::UnknownNode(id))
    }

    /// The output port of the directed link `source -> target`, if it exists.
    pub fn get_port(&self, source: NodeId, target: NodeId) -> Option<&crate::port::Port> {
        self.nodes.get(&source).and_then(|n| n.port(target))
    }

    /// Returns `true` if the node is a GPU owning the chunk.
    pub fn node_has_chunk(&self, id: NodeId, chunk: &ChunkId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.owns_chunk(chunk))
    }

    /// The current virtual time in seconds.
    pub fn now(&self) -> f64 {
        self.queue.now()
    }

    /// Get a reference to the event queue.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Completion time per transmission. A registered transmission missing from this map did
    /// not complete (e.g. its dependencies dead-locked, or `run` was truncated).
    pub fn tx_complete_time(&self) -> &HashMap<TxId, f64> {
        &self.tx_complete_time
    }

    /// Instant of the first packet injection per transmission.
    pub fn tx_first_send_time(&self) -> &HashMap<TxId, f64> {
        &self.tx_first_send_time
    }

    /// Readiness time per `(chunk, node)`: when the first arriving transmission for the chunk
    /// completed there. Initial sources own their chunks from the start and do not appear.
    pub fn chunk_ready_time(&self) -> &HashMap<(ChunkId, NodeId), f64> {
        &self.chunk_ready_time
    }

    /// Transmissions registered by fired rules that have not completed (yet).
    pub fn pending_transmissions(&self) -> Vec<&TxId> {
        self.tx_registered
            .iter()
            .filter(|tx| !self.tx_complete_time.contains_key(*tx))
            .collect()
    }

    /// The maximum transmission completion time, or `None` if nothing completed.
    pub fn makespan(&self) -> Option<f64> {
        self.tx_complete_time
            .values()
            .copied()
            .max_by(|a, b| a.total_cmp(b))
    }

    /// Snapshot the three result maps.
    pub fn results(&self) -> SimResults {
        SimResults {
            tx_complete_time: self.tx_complete_time.clone(),
            chunk_ready_time: self.chunk_ready_time.clone(),
            tx_first_send_time: self.tx_first_send_time.clone(),
        }
    }
}

/// Serializable snapshot of the simulation outputs.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimResults {
    /// Completion time per transmission
    #[serde_as(as = "Vec<(_, _)>")]
    pub tx_complete_time: HashMap<TxId, f64>,
    /// Readiness time per `(chunk, node)`
    #[serde_as(as = "Vec<(_, _)>")]
    pub chunk_ready_time: HashMap<(ChunkId, NodeId), f64>,
    /// First packet injection instant per transmission
    #[serde_as(as = "Vec<(_, _)>")]
    pub tx_first_send_time: HashMap<TxId, f64>,
}

impl SimResults {
    /// Serialize the snapshot to a json string.
    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize a snapshot from a json string.
    pub fn from_json(s: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(s)?)
    }
}
