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

use crate::types::{NodeId, Packet, TxId};

/// Packet size used throughout the tests.
const PKT: u64 = 1024;
/// Line rate used throughout the tests.
const RATE: f64 = 100e9;

/// Service time of one full packet (no header) at `RATE`.
fn pkt_service() -> f64 {
    (PKT * 8) as f64 / RATE
}

/// Build a test packet of a single-packet transmission on the given lane.
fn test_packet(src: NodeId, dst: NodeId, qpid: usize, seq: u64) -> Packet {
    Packet {
        tx: TxId::new(0u64, src, dst),
        seq,
        total_packets: 1,
        size_bytes: PKT,
        path: vec![src, dst],
        hop_idx: 0,
        qpid,
        rate_bps: 0.0,
        use_max_rate: true,
        created_time: 0.0,
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

mod test_port;
