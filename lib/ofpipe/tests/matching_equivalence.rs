// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! All matching algorithms must pick the same entry for every packet.
//! Random tables and packets are replayed against each of them and the
//! winners compared. Entry order and the overlap test are checked
//! over random entries as well.

use common::*;
use ofpipe::engine::flow_entry::check_overlap;
use ofpipe_test_utils as common;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::net::Ipv4Addr;

const ALGORITHMS: [MatchingAlgorithmKind; 3] = [
    MatchingAlgorithmKind::Loop,
    MatchingAlgorithmKind::L2Hash,
    MatchingAlgorithmKind::Trie,
];

const MACS: [MacAddr; 3] = [GUEST_MAC, GUEST_MAC2, GW_MAC];
const PORTS: [u16; 3] = [22, 80, 443];

fn ip(rng: &mut StdRng) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, rng.random_range(0..2), rng.random_range(1..4))
}

/// A random entry from a small universe of fields and values, so that
/// entries overlap and priorities tie often.
fn random_entry(rng: &mut StdRng, out: u32) -> FlowEntry {
    let mut ms = vec![];

    if rng.random_bool(0.4) {
        ms.push(Match::in_port(rng.random_range(1..4)));
    }
    if rng.random_bool(0.6) {
        ms.push(Match::eth_dst(MACS[rng.random_range(0..MACS.len())]));
    }
    match rng.random_range(0..4) {
        0 => ms.push(Match::vlan_vid(rng.random_range(1..3))),
        1 => ms.push(Match::no_vlan()),
        _ => {}
    }
    if rng.random_bool(0.5) {
        ms.push(Match::eth_type(ETHER_TYPE_IPV4));
        if rng.random_bool(0.5) {
            ms.push(Match::ipv4_dst(ip(rng), rng.random_range(16..=32)));
        }
        if rng.random_bool(0.5) {
            ms.push(Match::ip_proto(IP_PROTO_TCP));
            if rng.random_bool(0.5) {
                ms.push(Match::tcp_dst(PORTS[rng.random_range(0..PORTS.len())]));
            }
        }
    }

    output_entry(rng.random_range(0..4), ms, out)
}

fn random_packet(rng: &mut StdRng) -> Packet {
    let in_port = rng.random_range(1..4);
    let dport = PORTS[rng.random_range(0..PORTS.len())];
    let mut pkt = match rng.random_range(0..3) {
        0 => eth_pkt(in_port, GUEST_MAC, GUEST_MAC2),
        1 => tcp4_pkt(in_port, ip(rng), ip(rng), 4000, dport),
        _ => udp4_pkt(in_port, ip(rng), ip(rng), 4000, dport),
    };
    pkt.matches.eth_dst = MACS[rng.random_range(0..MACS.len())];
    if rng.random_bool(0.3) {
        pkt = tagged(pkt, rng.random_range(1..3));
    }
    pkt
}

fn pipelines() -> Vec<Pipeline> {
    let now = Moment::now();
    ALGORITHMS
        .iter()
        .map(|algo| pipeline_with(OfVersion::V13, 1, *algo, now).0)
        .collect()
}

/// Install the same random entries into every pipeline, removing an
/// earlier one now and then.
fn populate(rng: &mut StdRng, pipes: &[Pipeline]) {
    let mut handles = vec![];

    for i in 0..64 {
        let e = random_entry(rng, i + 1);
        let hs: Vec<_> = pipes
            .iter()
            .map(|p| p.add_flow_entry(0, e.clone(), false, false).unwrap())
            .collect();
        assert!(hs.iter().all(|h| *h == hs[0]));
        handles.push(hs[0]);

        // Churn: drop an earlier entry now and then.
        if rng.random_bool(0.2) {
            let h = handles.swap_remove(rng.random_range(0..handles.len()));
            for p in pipes {
                p.remove_specific(0, h).unwrap();
            }
        }
    }
}

fn check_round(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let pipes = pipelines();
    populate(&mut rng, &pipes);

    let lens: Vec<_> = pipes.iter().map(|p| p.tables()[0].len()).collect();
    assert!(lens.iter().all(|l| *l == lens[0]), "seed {seed}: {lens:?}");

    for _ in 0..256 {
        let pkt = random_packet(&mut rng);
        let expected = pipes[0].tables()[0].find_best_match(&pkt.matches);
        for (p, algo) in pipes.iter().zip(ALGORITHMS).skip(1) {
            let actual = p.tables()[0].find_best_match(&pkt.matches);
            assert_eq!(
                actual, expected,
                "seed {seed}: {algo} disagrees on {:?}",
                pkt.matches
            );
        }
    }
}

#[test]
fn algorithms_agree() {
    for seed in 0..32 {
        check_round(seed);
    }
}

#[test]
fn algorithms_agree_after_modify() {
    let pipes = pipelines();
    for p in &pipes {
        p.add_flow_entry(0, output_entry(5, vec![Match::eth_dst(GW_MAC)], 1), false, false)
            .unwrap();
        p.add_flow_entry(0, output_entry(5, vec![Match::in_port(1)], 2), false, false)
            .unwrap();
        p.add_flow_entry(
            0,
            output_entry(5, vec![Match::in_port(1), Match::eth_dst(GW_MAC)], 3),
            false,
            false,
        )
        .unwrap();
        p.add_flow_entry(0, output_entry(0, vec![], 4), false, false).unwrap();
    }

    let pkt = || tcp4_pkt(1, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 1, 80);
    for p in &pipes {
        // Most specific among equal priorities.
        assert_eq!(p.process_packet(pkt()).outputs, vec![3]);
    }

    let gone = output_entry(5, vec![Match::in_port(1), Match::eth_dst(GW_MAC)], 0);
    for p in &pipes {
        assert_eq!(p.remove_flow_entry(0, &gone, true, PORT_ANY, GROUP_ANY), Ok(1));
        // Equal priority and match count: the older entry wins.
        assert_eq!(p.process_packet(pkt()).outputs, vec![1]);
    }

    for p in &pipes {
        let tmpl = output_entry(0, vec![Match::eth_dst(GW_MAC)], 9);
        p.modify_flow_entry(0, tmpl, false, false).unwrap();
        assert_eq!(p.process_packet(pkt()).outputs, vec![9]);
        let other = eth_pkt(2, GUEST_MAC, GUEST_MAC2);
        assert_eq!(p.process_packet(other).outputs, vec![4]);
    }
}

#[test]
fn entries_listed_in_lookup_order() {
    for seed in 0..16 {
        let mut rng = StdRng::seed_from_u64(seed);
        let pipes = pipelines();
        populate(&mut rng, &pipes);

        let order: Vec<Vec<_>> = pipes
            .iter()
            .map(|p| p.tables()[0].entries().iter().map(|e| e.handle()).collect())
            .collect();

        for (p, algo) in pipes.iter().zip(ALGORITHMS) {
            let keys: Vec<(u32, usize)> = p.tables()[0]
                .entries()
                .iter()
                .map(|e| (e.priority(), e.matches().len()))
                .collect();
            assert!(
                keys.windows(2).all(|w| w[0] >= w[1]),
                "seed {seed}: {algo} lists {keys:?}"
            );

            // Flow stats come out in the same order.
            let dumped: Vec<(u32, usize)> = p
                .get_flow_stats(&FlowFilter::default())
                .unwrap()
                .iter()
                .map(|s| (s.priority, s.matches.len()))
                .collect();
            assert_eq!(dumped, keys, "seed {seed}: {algo}");
        }

        assert!(order.iter().all(|o| *o == order[0]), "seed {seed}");
    }
}

#[test]
fn overlap_is_symmetric() {
    let mut rng = StdRng::seed_from_u64(7);
    let entries: Vec<FlowEntry> =
        (0..96).map(|i| random_entry(&mut rng, i + 1)).collect();
    let packets: Vec<Packet> = (0..256).map(|_| random_packet(&mut rng)).collect();

    for a in &entries {
        for b in &entries {
            for check_priority in [false, true] {
                assert_eq!(
                    check_overlap(a, b, check_priority),
                    check_overlap(b, a, check_priority),
                    "{a} / {b}"
                );
            }

            // A packet matched by both is a witness of the overlap.
            let witness = packets
                .iter()
                .any(|p| a.matches.is_match(&p.matches) && b.matches.is_match(&p.matches));
            if witness {
                assert!(check_overlap(a, b, false), "{a} / {b}");
            }
        }
    }
}
