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

//! Test the port in isolation: service-time computation, rate validation, and the
//! round-robin discipline across queue-pairs.

use approx::assert_abs_diff_eq;
use pretty_assertions::assert_eq;

use super::{pkt_service, test_packet, PKT, RATE};
use crate::{
    port::Port,
    types::{LinkSpec, NodeId, SimError, TopologyGraph},
};

fn ids() -> (NodeId, NodeId) {
    let mut g = TopologyGraph::default();
    (g.add_node(()), g.add_node(()))
}

fn port(num_qps: usize, quantum: usize, header: u64) -> (Port, NodeId, NodeId) {
    let (a, b) = ids();
    let port = Port::new(a, b, LinkSpec::new(RATE, 0.0), num_qps, quantum, 0.0, header);
    (port, a, b)
}

/// Serve everything that is queued and return the packets in service order.
fn drain(port: &mut Port) -> Vec<(usize, u64)> {
    let mut order = Vec::new();
    while let Some((pkt, _)) = port.start_service().unwrap() {
        order.push((pkt.qpid, pkt.seq));
        port.finish_service();
    }
    order
}

#[test]
fn service_time_at_line_rate() {
    let (mut port, a, b) = port(1, 1, 0);
    let pkt = test_packet(a, b, 0, 0);
    assert_abs_diff_eq!(port.service_time(&pkt).unwrap(), pkt_service());

    // a packet with a fixed rate above the line rate is capped
    let mut capped = pkt.clone();
    capped.use_max_rate = false;
    capped.rate_bps = 2.0 * RATE;
    assert_abs_diff_eq!(port.service_time(&capped).unwrap(), pkt_service());

    // a packet with a fixed rate below the line rate is served at its own rate
    let mut slow = pkt;
    slow.use_max_rate = false;
    slow.rate_bps = RATE / 2.0;
    assert_abs_diff_eq!(port.service_time(&slow).unwrap(), 2.0 * pkt_service());

    port.set_link_rate(RATE / 4.0).unwrap();
    assert_abs_diff_eq!(port.service_time(&slow).unwrap(), 4.0 * pkt_service());
}

#[test]
fn service_time_includes_header() {
    let (port, a, b) = port(1, 1, 64);
    let pkt = test_packet(a, b, 0, 0);
    assert_abs_diff_eq!(
        port.service_time(&pkt).unwrap(),
        ((PKT + 64) * 8) as f64 / RATE
    );
}

#[test]
fn invalid_packet_rate() {
    let (port, a, b) = port(1, 1, 0);
    let mut pkt = test_packet(a, b, 0, 0);
    pkt.use_max_rate = false;
    pkt.rate_bps = 0.0;
    assert_eq!(
        port.service_time(&pkt),
        Err(SimError::InvalidRate {
            src: a,
            dst: b,
            rate: 0.0
        })
    );
}

#[test]
fn link_rate_update_validation() {
    let (mut port, a, b) = port(1, 1, 0);
    for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            port.set_link_rate(bad),
            Err(SimError::InvalidRate { src, dst, .. }) if src == a && dst == b
        ));
    }

    port.set_link_rate(50e9).unwrap();
    assert_eq!(port.link(), LinkSpec::new(50e9, 0.0));
}

#[test]
fn update_keeps_prop_delay() {
    let (a, b) = ids();
    let mut port = Port::new(a, b, LinkSpec::new(RATE, 1e-6), 1, 1, 0.0, 0);
    port.set_link_rate(50e9).unwrap();
    assert_eq!(port.link(), LinkSpec::new(50e9, 1e-6));
}

#[test]
fn round_robin_quantum_one() {
    let (mut port, a, b) = port(2, 1, 0);
    for seq in 0..3 {
        port.enqueue(test_packet(a, b, 0, seq));
        port.enqueue(test_packet(a, b, 1, seq));
    }
    assert_eq!(
        drain(&mut port),
        vec![(0, 0), (1, 0), (0, 1), (1, 1), (0, 2), (1, 2)]
    );
}

#[test]
fn round_robin_quantum_two() {
    let (mut port, a, b) = port(2, 2, 0);
    for seq in 0..4 {
        port.enqueue(test_packet(a, b, 0, seq));
    }
    for seq in 0..2 {
        port.enqueue(test_packet(a, b, 1, seq));
    }
    assert_eq!(
        drain(&mut port),
        vec![(0, 0), (0, 1), (1, 0), (1, 1), (0, 2), (0, 3)]
    );
}

#[test]
fn round_robin_skips_empty_queues() {
    let (mut port, a, b) = port(4, 1, 0);
    for seq in 0..2 {
        port.enqueue(test_packet(a, b, 0, seq));
    }
    port.enqueue(test_packet(a, b, 2, 0));
    assert_eq!(drain(&mut port), vec![(0, 0), (2, 0), (0, 1)]);
}

#[test]
fn cursor_advances_when_queue_empties_mid_quantum() {
    let (mut port, a, b) = port(2, 3, 0);
    port.enqueue(test_packet(a, b, 0, 0));
    port.enqueue(test_packet(a, b, 1, 0));
    port.enqueue(test_packet(a, b, 1, 1));
    assert_eq!(drain(&mut port), vec![(0, 0), (1, 0), (1, 1)]);
}

#[test]
fn quantum_counts_late_arrivals_in_the_same_visit() {
    let (mut port, a, b) = port(2, 2, 0);
    port.enqueue(test_packet(a, b, 0, 0));
    port.enqueue(test_packet(a, b, 1, 0));

    let (pkt, _) = port.start_service().unwrap().unwrap();
    assert_eq!((pkt.qpid, pkt.seq), (0, 0));
    // arrives while (0, 0) is still in service; the visit has quantum left
    port.enqueue(test_packet(a, b, 0, 1));
    port.finish_service();

    assert_eq!(drain(&mut port), vec![(0, 1), (1, 0)]);
}

#[test]
fn qpid_wraps_around_num_qps() {
    let (mut port, a, b) = port(2, 1, 0);
    // lane 5 of a 2-lane port lands on queue-pair 1
    port.enqueue(test_packet(a, b, 5, 0));
    port.enqueue(test_packet(a, b, 0, 0));
    assert_eq!(drain(&mut port), vec![(0, 0), (5, 0)]);
}

#[test]
fn enqueue_arms_the_drain_exactly_once() {
    let (mut port, a, b) = port(1, 1, 0);
    assert!(port.is_idle());
    assert!(port.enqueue(test_packet(a, b, 0, 0)));
    assert!(!port.enqueue(test_packet(a, b, 0, 1)));
    assert_eq!(port.queued(), 2);

    assert_eq!(drain(&mut port).len(), 2);
    assert!(port.is_idle());
    assert_eq!(port.queued(), 0);

    // the next enqueue arms a fresh drain
    assert!(port.enqueue(test_packet(a, b, 0, 2)));
}

#[test]
fn tx_proc_delay_charged_per_packet() {
    let (a, b) = ids();
    let mut port = Port::new(a, b, LinkSpec::new(RATE, 0.0), 1, 1, 1e-6, 0);
    port.enqueue(test_packet(a, b, 0, 0));
    let (_, delay) = port.start_service().unwrap().unwrap();
    assert_abs_diff_eq!(delay, 1e-6 + pkt_service());
}
