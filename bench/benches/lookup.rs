// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use ofpipe_bench::MeasurementInfo;
use ofpipe_bench::alloc::AllocBytes;
use ofpipe_bench::alloc::Allocs;
use ofpipe_bench::alloc::counting;
use ofpipe_bench::l2_switch;
use ofpipe_bench::l3_router;
use ofpipe_test_utils::MatchingAlgorithmKind;
use std::hint::black_box;

const ALGORITHMS: [MatchingAlgorithmKind; 3] = [
    MatchingAlgorithmKind::Loop,
    MatchingAlgorithmKind::L2Hash,
    MatchingAlgorithmKind::Trie,
];

pub fn l2_lookup<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut c = c.benchmark_group(format!("{}/l2", M::label()));

    for hosts in [16, 1024] {
        for algo in ALGORITHMS {
            let (p, pkts) = l2_switch(algo, hosts);
            let mut next = pkts.iter().cycle();

            c.bench_with_input(
                BenchmarkId::new(format!("{algo:?}"), hosts),
                &hosts,
                |b, _| {
                    b.iter_with_large_drop(|| {
                        let pkt = next.next().cloned().unwrap_or_default();
                        p.process_packet(black_box(pkt))
                    })
                },
            );
        }
    }
}

pub fn l3_lookup<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut c = c.benchmark_group(format!("{}/l3", M::label()));

    for routes in [16, 512] {
        for algo in ALGORITHMS {
            let (p, pkts) = l3_router(algo, routes, 0x0f1e);
            let mut next = pkts.iter().cycle();

            c.bench_with_input(
                BenchmarkId::new(format!("{algo:?}"), routes),
                &routes,
                |b, _| {
                    b.iter_with_large_drop(|| {
                        let pkt = next.next().cloned().unwrap_or_default();
                        p.process_packet(black_box(pkt))
                    })
                },
            );
        }
    }
}

criterion_group!(lookup_wall, l2_lookup, l3_lookup);
criterion_group!(
    name = lookup_alloc;
    config = counting::<Allocs>();
    targets = l2_lookup, l3_lookup
);
criterion_group!(
    name = lookup_alloc_bytes;
    config = counting::<AllocBytes>();
    targets = l2_lookup, l3_lookup
);
criterion_main!(lookup_wall, lookup_alloc, lookup_alloc_bytes);
