// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Idle and hard timeouts, driven by explicit sweep times.

use common::*;
use ofpipe::api::TimerConfig;
use ofpipe_test_utils as common;

fn single_table(t0: Moment) -> (Pipeline, RecordingHooks) {
    let cfg = PipelineConfig { num_tables: 1, ..Default::default() };
    pipeline_at(&cfg, t0)
}

fn hit(p: &Pipeline) {
    let res = p.process_packet(eth_pkt(1, GUEST_MAC, GUEST_MAC2));
    assert_eq!(res.outputs, vec![2]);
}

#[test]
fn idle_timeout_follows_traffic() {
    let t0 = Moment::now();
    let (p, hooks) = single_table(t0);
    let e = output_entry(10, vec![Match::in_port(1)], 2)
        .with_idle_timeout(2)
        .with_notify();
    p.add_flow_entry_at(0, e, false, false, t0).unwrap();
    assert_eq!(p.tables()[0].num_timers(), 1);

    // Traffic every 500ms keeps the entry alive.
    for ms in (500..=3_000).step_by(500) {
        hit(&p);
        assert_eq!(p.expire_flows_at(after_ms(t0, ms)), 0, "expired at {ms}ms");
    }

    // The check at 2s saw traffic and re-armed for 4s; that one saw
    // the packets of 2.5s and 3s and re-armed for 6s.
    assert_eq!(p.expire_flows_at(after_ms(t0, 4_000)), 0);
    assert_eq!(p.expire_flows_at(after_ms(t0, 5_999)), 0);
    assert_eq!(p.expire_flows_at(after_ms(t0, 6_000)), 1);

    assert_eq!(p.tables()[0].len(), 0);
    assert_eq!(p.tables()[0].num_timers(), 0);
    assert_eq!(hooks.flow_removed(), vec![(RemovalReason::IdleTimeout, 10)]);
}

#[test]
fn idle_entry_without_traffic() {
    let t0 = Moment::now();
    let (p, hooks) = single_table(t0);
    let e = output_entry(10, vec![], 2).with_idle_timeout(1).with_notify();
    p.add_flow_entry_at(0, e, false, false, t0).unwrap();

    assert_eq!(p.expire_flows_at(after_ms(t0, 999)), 0);
    assert_eq!(p.expire_flows_at(after_ms(t0, 1_000)), 1);
    assert_eq!(hooks.flow_removed(), vec![(RemovalReason::IdleTimeout, 10)]);

    let res = p.process_packet(eth_pkt(1, GUEST_MAC, GUEST_MAC2));
    assert_eq!(res.drop, Some(DropReason::TableMiss { table_id: 0 }));
}

#[test]
fn hard_timeout_ignores_traffic() {
    let t0 = Moment::now();
    let (p, hooks) = single_table(t0);
    let e = output_entry(10, vec![Match::in_port(1)], 2)
        .with_idle_timeout(2)
        .with_hard_timeout(3)
        .with_notify();
    p.add_flow_entry_at(0, e, false, false, t0).unwrap();
    assert_eq!(p.tables()[0].num_timers(), 2);

    for ms in (500..3_000).step_by(500) {
        hit(&p);
        assert_eq!(p.expire_flows_at(after_ms(t0, ms)), 0);
    }
    hit(&p);
    assert_eq!(p.expire_flows_at(after_ms(t0, 3_000)), 1);

    // Removal drops the idle timer as well.
    assert_eq!(p.tables()[0].num_timers(), 0);
    assert_eq!(hooks.flow_removed(), vec![(RemovalReason::HardTimeout, 10)]);
}

#[test]
fn removal_cancels_timers() {
    let t0 = Moment::now();
    let (p, hooks) = single_table(t0);
    let e = output_entry(10, vec![Match::in_port(1)], 2)
        .with_hard_timeout(1)
        .with_notify();
    let h = p.add_flow_entry_at(0, e, false, false, t0).unwrap();

    assert_eq!(p.remove_specific(0, h), Ok(true));
    assert_eq!(p.remove_specific(0, h), Ok(false));
    assert_eq!(p.tables()[0].num_timers(), 0);
    assert_eq!(p.expire_flows_at(after_ms(t0, 5_000)), 0);
    assert_eq!(hooks.flow_removed(), vec![(RemovalReason::Delete, 10)]);
}

#[test]
fn replacement_rearms_timers() {
    let t0 = Moment::now();
    let (p, hooks) = single_table(t0);
    let e = output_entry(10, vec![Match::in_port(1)], 2).with_hard_timeout(2);
    p.add_flow_entry_at(0, e, false, false, t0).unwrap();

    // The replacement carries a timeout of its own, counted from the
    // time it was installed.
    let e = output_entry(10, vec![Match::in_port(1)], 2)
        .with_hard_timeout(2)
        .with_notify();
    p.add_flow_entry_at(0, e, false, false, after_ms(t0, 1_500)).unwrap();
    assert_eq!(p.tables()[0].num_timers(), 1);

    assert_eq!(p.expire_flows_at(after_ms(t0, 2_000)), 0);
    assert_eq!(p.expire_flows_at(after_ms(t0, 4_000)), 1);
    assert_eq!(hooks.flow_removed(), vec![(RemovalReason::HardTimeout, 10)]);
}

#[test]
fn timeouts_bounded_by_the_ring() {
    let t0 = Moment::now();
    let cfg = PipelineConfig {
        num_tables: 1,
        timer: TimerConfig { slots: 8, slot_ms: 250 },
        ..Default::default()
    };
    let (p, _) = pipeline_at(&cfg, t0);

    // The ring spans 2s, so that is the longest timeout it takes.
    let e = output_entry(10, vec![], 2).with_hard_timeout(3);
    assert!(matches!(
        p.add_flow_entry_at(0, e, false, false, t0),
        Err(ofpipe::api::FlowModError::Validation(
            ofpipe::api::ValidationError::TimeoutTooLarge { timeout: 3, max_secs: 2 }
        ))
    ));

    let e = output_entry(10, vec![], 2).with_hard_timeout(2);
    p.add_flow_entry_at(0, e, false, false, t0).unwrap();
    for ms in (250..2_000).step_by(250) {
        assert_eq!(p.expire_flows_at(after_ms(t0, ms)), 0, "expired at {ms}ms");
    }
    assert_eq!(p.expire_flows_at(after_ms(t0, 2_000)), 1);

    // A second revolution works the same way.
    let t1 = after_ms(t0, 2_100);
    let e = output_entry(10, vec![], 2).with_hard_timeout(2);
    p.add_flow_entry_at(0, e, false, false, t1).unwrap();
    assert_eq!(p.expire_flows_at(after_ms(t0, 4_000)), 0);
    assert_eq!(p.expire_flows_at(after_ms(t0, 4_250)), 1);
}

#[test]
fn timeouts_in_every_table() {
    let t0 = Moment::now();
    let (p, hooks) = pipeline_at(&PipelineConfig::default(), t0);
    for table_id in 0..3 {
        let e = output_entry(u32::from(table_id), vec![], 2)
            .with_hard_timeout(u32::from(table_id) + 1)
            .with_notify();
        p.add_flow_entry_at(table_id, e, false, false, t0).unwrap();
    }

    assert_eq!(p.expire_flows_at(after_ms(t0, 2_000)), 2);
    assert_eq!(p.expire_flows_at(after_ms(t0, 3_000)), 1);
    assert_eq!(
        hooks.flow_removed(),
        vec![
            (RemovalReason::HardTimeout, 0),
            (RemovalReason::HardTimeout, 1),
            (RemovalReason::HardTimeout, 2),
        ]
    );
}
