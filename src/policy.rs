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

//! Module defining transmission rules and the policy engine.
//!
//! Rules are installed up front and keyed by `(chunk, source)`. When a chunk becomes ready at
//! a node, every rule keyed there is scheduled exactly once. Before firing, a scheduled rule
//! passes two edge-triggered gates: an earliest-release time, and the readiness of every
//! dependency chunk at the rule's source. Firing expands the rule into its packet stream.
//!
//! Rule identity is the install index: two entries with identical fields are distinct rules
//! and both fire.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::types::{ChunkId, NodeId, Packet, SimConfig, SimError, TxId};

/// Requested transmission rate of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Rate {
    /// A fixed rate in bits per second. Must be positive and finite.
    Bps(f64),
    /// Use the full line rate of every traversed link.
    Max,
}

impl Rate {
    /// Resolve into the pair `(rate_bps, use_max_rate)` carried by packets, validating the
    /// fixed-rate case.
    pub fn resolve(&self) -> Result<(f64, bool), SimError> {
        match *self {
            Rate::Max => Ok((0.0, true)),
            Rate::Bps(r) if r.is_finite() && r > 0.0 => Ok((r, false)),
            Rate::Bps(r) => Err(SimError::InvalidPolicy(format!(
                "rate must be > 0 and finite, or Max, got {r}"
            ))),
        }
    }
}

impl From<f64> for Rate {
    fn from(x: f64) -> Self {
        Self::Bps(x)
    }
}

impl std::str::FromStr for Rate {
    type Err = SimError;

    /// Parse a rate from a string: a positive number in bits per second, or the
    /// case-insensitive word `max`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("max") {
            return Ok(Rate::Max);
        }
        match trimmed.parse::<f64>() {
            Ok(r) if r.is_finite() && r > 0.0 => Ok(Rate::Bps(r)),
            _ => Err(SimError::InvalidPolicy(format!(
                "invalid rate string: {s:?}, use a number in bps or \"Max\""
            ))),
        }
    }
}

/// One transmission rule.
///
/// A rule moves one chunk from `src` to `dst` along a fixed path, on a given queue-pair lane,
/// at a requested rate. It fires once the chunk is ready at `src`, no earlier than `time`, and
/// only after every chunk in `dependency` is ready at `src`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// The chunk this rule transmits
    pub chunk: ChunkId,
    /// Source GPU
    pub src: NodeId,
    /// Destination GPU
    pub dst: NodeId,
    /// Queue-pair lane used on every traversed port
    pub qpid: usize,
    /// Requested rate
    pub rate: Rate,
    /// Size of the chunk in bytes
    pub chunk_size_bytes: u64,
    /// Path from `src` to `dst`, both included
    pub path: Vec<NodeId>,
    /// Earliest release time in seconds
    pub time: f64,
    /// Chunks that must be ready at `src` before this rule fires
    pub dependency: Vec<ChunkId>,
}

impl PolicyEntry {
    /// Create a rule without time gate or dependencies.
    pub fn new(
        chunk: impl Into<ChunkId>,
        src: NodeId,
        dst: NodeId,
        qpid: usize,
        rate: Rate,
        chunk_size_bytes: u64,
        path: Vec<NodeId>,
    ) -> Self {
        Self {
            chunk: chunk.into(),
            src,
            dst,
            qpid,
            rate,
            chunk_size_bytes,
            path,
            time: 0.0,
            dependency: Vec::new(),
        }
    }

    /// Set the earliest release time.
    pub fn at_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Add dependency chunks.
    pub fn after<C: Into<ChunkId>>(mut self, deps: impl IntoIterator<Item = C>) -> Self {
        self.dependency.extend(deps.into_iter().map(|c| c.into()));
        self
    }

    /// The identity of the transmission this rule expands into.
    pub fn tx_id(&self) -> TxId {
        TxId {
            chunk: self.chunk.clone(),
            src: self.src,
            dst: self.dst,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SimError> {
        if self.path.first() != Some(&self.src) || self.path.last() != Some(&self.dst) {
            return Err(SimError::InvalidPolicy(format!(
                "path must start at src and end at dst for chunk {}",
                self.chunk
            )));
        }
        if self.chunk_size_bytes == 0 {
            return Err(SimError::InvalidPolicy(format!(
                "chunk_size_bytes must be > 0 for chunk {}",
                self.chunk
            )));
        }
        if !self.time.is_finite() || self.time < 0.0 {
            return Err(SimError::InvalidPolicy(format!(
                "release time must be finite and >= 0 for chunk {}, got {}",
                self.chunk, self.time
            )));
        }
        if self.dependency.contains(&self.chunk) {
            return Err(SimError::InvalidPolicy(format!(
                "chunk {} must not depend on itself",
                self.chunk
            )));
        }
        self.rate.resolve().map(|_| ())
    }
}

/// Outcome of evaluating the gates of a scheduled rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum GateOutcome {
    /// The time gate is still closed; re-evaluate at the given absolute time.
    WaitUntil(f64),
    /// A dependency is not ready; a waiter was registered on its latch.
    Blocked,
    /// Both gates passed; expand the rule into packets.
    Fire,
}

/// Policy-driven packet injection.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    entries: Vec<PolicyEntry>,
    /// Install-ordered rule indices per `(chunk, src)` key.
    rules: HashMap<(ChunkId, NodeId), Vec<usize>>,
    /// Per-rule latch: a rule is scheduled at most once.
    scheduled: Vec<bool>,
    /// Readiness latches, one per `(chunk, node)`.
    ready: HashSet<(ChunkId, NodeId)>,
    /// Rules blocked on a latch, in registration order.
    waiters: HashMap<(ChunkId, NodeId), Vec<usize>>,
}

impl PolicyEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and install rules. Installation is not sensitive to entry order; for rules
    /// sharing a `(chunk, src)` key, the install order decides the firing order.
    pub fn install(
        &mut self,
        entries: impl IntoIterator<Item = PolicyEntry>,
    ) -> Result<(), SimError> {
        for entry in entries {
            entry.validate()?;
            let idx = self.entries.len();
            self.rules
                .entry((entry.chunk.clone(), entry.src))
                .or_default()
                .push(idx);
            self.entries.push(entry);
            self.scheduled.push(false);
        }
        Ok(())
    }

    /// The installed rule with the given index.
    pub fn entry(&self, rule: usize) -> &PolicyEntry {
        &self.entries[rule]
    }

    /// Number of installed rules.
    pub fn num_rules(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the chunk is ready at the node.
    pub fn is_ready(&self, chunk: &ChunkId, node: NodeId) -> bool {
        self.ready.contains(&(chunk.clone(), node))
    }

    /// Per chunk, the set of nodes that produce it but never receive it. A chunk whose every
    /// source is also a destination falls back to the full source set. These are the nodes
    /// seeded with the chunk at bootstrap.
    pub fn initial_sources(&self) -> BTreeMap<ChunkId, Vec<NodeId>> {
        let mut srcs: BTreeMap<ChunkId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut dsts: BTreeMap<ChunkId, BTreeSet<NodeId>> = BTreeMap::new();
        for ((chunk, src), rules) in &self.rules {
            srcs.entry(chunk.clone()).or_default().insert(*src);
            for &rule in rules {
                dsts.entry(chunk.clone())
                    .or_default()
                    .insert(self.entries[rule].dst);
            }
        }

        srcs.into_iter()
            .map(|(chunk, sources)| {
                let receivers = dsts.get(&chunk);
                let initial = sources
                    .iter()
                    .filter(|&s| !receivers.is_some_and(|d| d.contains(s)))
                    .copied()
                    .collect_vec();
                let initial = if initial.is_empty() {
                    sources.into_iter().collect_vec()
                } else {
                    initial
                };
                (chunk, initial)
            })
            .collect()
    }

    /// Latch `(chunk, node)` as ready and return the rules to trigger, in order: first the
    /// newly scheduled rules keyed at `(chunk, node)`, then the waiters registered on the
    /// latch. Only the first invocation per `(chunk, node)` has any effect.
    pub(crate) fn on_chunk_ready(&mut self, node: NodeId, chunk: ChunkId) -> Vec<usize> {
        let key = (chunk, node);
        if !self.ready.insert(key.clone()) {
            return Vec::new();
        }

        let mut triggers = Vec::new();
        if let Some(rules) = self.rules.get(&key) {
            for &rule in rules {
                if !self.scheduled[rule] {
                    self.scheduled[rule] = true;
                    triggers.push(rule);
                }
            }
        }
        if let Some(waiters) = self.waiters.remove(&key) {
            triggers.extend(waiters);
        }
        triggers
    }

    /// Evaluate the gates of a scheduled rule at virtual time `now`. When a dependency is not
    /// yet ready, the rule is parked on that dependency's latch; it is re-evaluated from
    /// scratch when the latch fires. No waiter is constructed for an already-satisfied
    /// dependency.
    pub(crate) fn evaluate(&mut self, rule: usize, now: f64) -> GateOutcome {
        let entry = &self.entries[rule];
        if now < entry.time {
            return GateOutcome::WaitUntil(entry.time);
        }
        for dep in &entry.dependency {
            let key = (dep.clone(), entry.src);
            if !self.ready.contains(&key) {
                self.waiters.entry(key).or_default().push(rule);
                return GateOutcome::Blocked;
            }
        }
        GateOutcome::Fire
    }

    /// Expand a fired rule into its packet stream.
    ///
    /// The stream has `ceil(chunk_size_bytes / packet_size_bytes)` packets (at least one); all
    /// but the last carry a full packet, the last carries the residual bytes.
    pub(crate) fn fire(
        &self,
        rule: usize,
        config: &SimConfig,
        now: f64,
    ) -> Result<(TxId, Vec<Packet>), SimError> {
        let entry = &self.entries[rule];
        let (rate_bps, use_max_rate) = entry.rate.resolve()?;

        let ps = config.packet_size_bytes;
        let total_packets = ((entry.chunk_size_bytes + ps - 1) / ps).max(1);
        let tx = entry.tx_id();

        let packets = (0..total_packets)
            .map(|i| {
                let remaining = entry.chunk_size_bytes - i * ps;
                Packet {
                    tx: tx.clone(),
                    seq: i,
                    total_packets,
                    size_bytes: remaining.min(ps),
                    path: entry.path.clone(),
                    hop_idx: 0,
                    qpid: entry.qpid,
                    rate_bps,
                    use_max_rate,
                    created_time: now,
                }
            })
            .collect();

        Ok((tx, packets))
    }
}
