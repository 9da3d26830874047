// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Shared fixtures for the pipeline benchmarks.

use criterion::measurement::Measurement;
use criterion::measurement::WallTime;
use ofpipe::api::PacketInReason;
use ofpipe::api::RemovalReason;
use ofpipe::api::SwitchId;
use ofpipe::engine::flow_entry::TableEntry;
use ofpipe::provider::PlatformHooks;
use ofpipe_test_utils::*;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::net::Ipv4Addr;

#[cfg(feature = "alloc")]
pub mod alloc;

/// Additional labelling information for [`Measurement`]s for
/// pretty-printing and grouping.
pub trait MeasurementInfo: Measurement {
    fn label() -> &'static str;
}

impl MeasurementInfo for WallTime {
    fn label() -> &'static str {
        "wallclock"
    }
}

/// Hooks that drop everything on the floor.
#[derive(Clone, Copy)]
pub struct Sink;

impl PlatformHooks for Sink {
    fn packet_in(&self, _: &SwitchId, _: u8, _: Packet, _: u16, _: PacketInReason) {}

    fn flow_removed(&self, _: &SwitchId, _: RemovalReason, _: &TableEntry) {}

    fn packet_out(&self, _: &SwitchId, _: &Packet, _: u32, _: Option<u32>) {}
}

fn sink_pipeline(num_tables: u16, algorithm: MatchingAlgorithmKind) -> Pipeline {
    let cfg = PipelineConfig {
        num_tables,
        stat_shards: 4,
        default_table: TableConfig {
            algorithm,
            max_entries: Some(1 << 20),
            ..Default::default()
        },
        ..Default::default()
    };
    let providers = Providers { log: Box::new(NullLog), hooks: Box::new(Sink) };
    Pipeline::new(&cfg, providers).expect("bench pipeline config is valid")
}

fn host_mac(i: u32) -> MacAddr {
    let b = i.to_be_bytes();
    MacAddr::from([0x02, 0x00, b[0], b[1], b[2], b[3]])
}

/// A single table learning switch: one entry per host on its MAC, and
/// a packet towards each host.
pub fn l2_switch(algorithm: MatchingAlgorithmKind, hosts: u32) -> (Pipeline, Vec<Packet>) {
    let p = sink_pipeline(1, algorithm);
    let mut pkts = Vec::with_capacity(hosts as usize);

    for i in 0..hosts {
        let mac = host_mac(i);
        let port = 1 + i % 48;
        p.add_flow_entry(0, output_entry(10, vec![Match::eth_dst(mac)], port), false, false)
            .expect("unique entry");
        pkts.push(eth_pkt(1 + (i + 1) % 48, host_mac(i + 1), mac));
    }

    (p, pkts)
}

/// A two table router: a port ACL in table 0 over a routing table of
/// random prefixes in table 1. Packets are aimed at random routes.
pub fn l3_router(
    algorithm: MatchingAlgorithmKind,
    routes: u32,
    seed: u64,
) -> (Pipeline, Vec<Packet>) {
    let p = sink_pipeline(2, algorithm);
    let mut rng = StdRng::seed_from_u64(seed);

    let ip4 = || vec![Match::eth_type(ETHER_TYPE_IPV4)];
    for (prio, port) in [(30, 22u16), (20, 23)] {
        let mut ms = ip4();
        ms.extend([Match::ip_proto(IP_PROTO_TCP), Match::tcp_dst(port)]);
        p.add_flow_entry(0, apply_entry(prio, ms, vec![Action::output(PORT_CONTROLLER)]), false, false)
            .expect("unique entry");
    }
    let goto = FlowEntry::new(0, FlowMatch::new(), InstructionSet::from(vec![Instruction::GotoTable(1)]));
    p.add_flow_entry(0, goto, false, false).expect("unique entry");

    let mut dsts = Vec::with_capacity(routes as usize);
    for i in 0..routes {
        let prefix_len = rng.random_range(16..=32);
        let addr = Ipv4Addr::from(rng.random::<u32>() & (u32::MAX << (32 - prefix_len)));
        let mut ms = ip4();
        ms.push(Match::ipv4_dst(addr, prefix_len as u8));
        // Longer prefixes win.
        let entry = output_entry(prefix_len, ms, 1 + i % 48);
        if p.add_flow_entry(1, entry, false, false).is_ok() {
            dsts.push(addr);
        }
    }

    let src = Ipv4Addr::new(192, 168, 0, 1);
    let pkts = dsts
        .iter()
        .map(|dst| tcp4_pkt(1, src, *dst, rng.random_range(1024..u16::MAX), 443))
        .collect();

    (p, pkts)
}
