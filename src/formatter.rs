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

//! Module that introduces a formatter to display all types containing `NodeId`.

use itertools::Itertools;

use crate::{
    event::Event,
    sim::Simulator,
    types::{NodeId, Packet, TxId},
};

/// Trait to format a type that contains NodeIds
pub trait SimFormatter<'a, 'n> {
    /// Type that is returned, which implements `std::fmt::Display`.
    type Formatter;

    /// Return a struct that can be formatted and displayed.
    fn fmt(&'a self, sim: &'n Simulator) -> Self::Formatter;
}

impl<'a, 'n> SimFormatter<'a, 'n> for NodeId {
    type Formatter = &'n str;

    fn fmt(&'a self, sim: &'n Simulator) -> Self::Formatter {
        sim.get_node_name(*self).unwrap_or("?")
    }
}

impl<'a, 'n> SimFormatter<'a, 'n> for [NodeId] {
    type Formatter = String;

    fn fmt(&'a self, sim: &'n Simulator) -> Self::Formatter {
        self.iter().map(|n| n.fmt(sim)).join(" -> ")
    }
}

impl<'a, 'n> SimFormatter<'a, 'n> for TxId {
    type Formatter = String;

    fn fmt(&'a self, sim: &'n Simulator) -> Self::Formatter {
        format!(
            "{}: {} -> {}",
            self.chunk,
            self.src.fmt(sim),
            self.dst.fmt(sim)
        )
    }
}

impl<'a, 'n> SimFormatter<'a, 'n> for Packet {
    type Formatter = String;

    fn fmt(&'a self, sim: &'n Simulator) -> Self::Formatter {
        format!(
            "pkt {}/{} of ({})",
            self.seq + 1,
            self.total_packets,
            self.tx.fmt(sim)
        )
    }
}

impl<'a, 'n> SimFormatter<'a, 'n> for Event {
    type Formatter = String;

    fn fmt(&'a self, sim: &'n Simulator) -> Self::Formatter {
        match self {
            Event::Drain(u, v) => format!("drain port {} -> {}", u.fmt(sim), v.fmt(sim)),
            Event::Served(u, v, pkt) => format!(
                "port {} -> {} served {}",
                u.fmt(sim),
                v.fmt(sim),
                pkt.fmt(sim)
            ),
            Event::Deliver(n, pkt) => format!("deliver {} at {}", pkt.fmt(sim), n.fmt(sim)),
            Event::Forward(n, pkt) => format!("forward {} at {}", pkt.fmt(sim), n.fmt(sim)),
            Event::Stored(n, tx) => format!("stored ({}) at {}", tx.fmt(sim), n.fmt(sim)),
            Event::Trigger(rule) => format!("trigger rule {rule}"),
            Event::RateBatch(i) => format!("apply link-rate batch {i}"),
        }
    }
}
