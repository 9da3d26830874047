// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Replay the bundled scenarios.

use ofpadm::Report;
use ofpadm::Scenario;
use ofpipe::api::PacketInReason;
use ofpipe::engine::pipeline::DropReason;
use ofpipe::engine::pipeline::ProcessResult;
use slog::Logger;
use std::path::Path;
use std::path::PathBuf;

fn scenario_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios")
}

fn run(name: &str) -> Report {
    let path = scenario_dir().join(name);
    let scenario = Scenario::load(&path)
        .unwrap_or_else(|e| panic!("failed to load {}: {e}", path.display()));
    let log = Logger::root(slog::Discard, slog::o!());
    scenario
        .run(&log)
        .unwrap_or_else(|e| panic!("failed to run {}: {e}", path.display()))
}

// The results for the `index`th packet of the scenario, one per copy
// sent.
fn results(report: &Report, index: usize) -> Vec<&ProcessResult> {
    report
        .packets
        .iter()
        .filter(|p| p.index == index)
        .map(|p| &p.result)
        .collect()
}

#[test]
fn every_scenario_checks_and_runs() {
    let mut seen = 0;
    for entry in std::fs::read_dir(scenario_dir())
        .unwrap_or_else(|e| panic!("failed to find scenarios: {e}"))
    {
        let path = entry.unwrap().path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let scenario = Scenario::load(&path)
            .unwrap_or_else(|e| panic!("failed to load {name}: {e}"));
        scenario.check().unwrap_or_else(|e| panic!("{name}: {e}"));

        let report = run(name);
        assert!(report.errors.is_empty(), "{name}: {:?}", report.errors);
        seen += 1;
    }
    assert!(seen >= 2);
}

#[test]
fn gateway() {
    let report = run("gateway.ron");
    assert_eq!(report.packets.len(), 11);
    assert_eq!(report.expired, 1);

    // One ECMP member carries the whole flow.
    let ecmp = results(&report, 0);
    assert_eq!(ecmp.len(), 3);
    assert_eq!(ecmp[0].tables, vec![0, 1]);
    assert_eq!(ecmp[0].outputs.len(), 1);
    assert!([2, 3].contains(&ecmp[0].outputs[0]));
    assert!(ecmp.iter().all(|r| r.outputs == ecmp[0].outputs));

    assert_eq!(results(&report, 1)[0].packet_ins, vec![PacketInReason::ExplicitAction]);

    // Fast failover before and after port 4 goes down.
    assert_eq!(results(&report, 2)[0].outputs, vec![4]);
    assert_eq!(results(&report, 3)[0].outputs, vec![5]);

    assert_eq!(results(&report, 4)[0].packet_ins, vec![PacketInReason::InvalidTtl]);

    // The ssh trap, then its expiry.
    let trapped = results(&report, 5)[0];
    assert_eq!(trapped.tables, vec![0]);
    assert_eq!(trapped.packet_ins, vec![PacketInReason::ExplicitAction]);
    let released = results(&report, 7)[0];
    assert_eq!(released.tables, vec![0, 1]);
    assert_eq!(released.outputs.len(), 1);

    // With the catch-all deleted, misses fall through to the end.
    assert_eq!(
        results(&report, 6)[0].drop,
        Some(DropReason::TableMiss { table_id: 1 })
    );

    // Packet-out resubmitted to table 0 with the gateway MAC.
    let out = results(&report, 8)[0];
    assert_eq!(out.tables, vec![0, 1]);
    assert_eq!(out.outputs.len(), 1);
    assert!([2, 3].contains(&out.outputs[0]));

    let stats = report.pipeline.get_group_stats(1);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].packet_count, 5);
}

#[test]
fn of10_learning_switch() {
    let report = run("learning.json");
    assert_eq!(report.packets.len(), 6);

    assert_eq!(results(&report, 0)[0].outputs, vec![2]);
    assert_eq!(results(&report, 1)[0].outputs, vec![2]);
    assert_eq!(results(&report, 2)[0].outputs, vec![1]);

    // Exact entries outrank the higher priority OUI entry, which still
    // catches unknown hosts behind it.
    assert_eq!(results(&report, 3)[0].packet_ins, vec![PacketInReason::ExplicitAction]);

    // The idle entry went quiet after 500ms and is gone by 5s.
    assert_eq!(report.expired, 1);
    assert_eq!(results(&report, 4)[0].packet_ins, vec![PacketInReason::ExplicitAction]);
    assert_eq!(results(&report, 5)[0].packet_ins, vec![PacketInReason::NoMatch]);
}
