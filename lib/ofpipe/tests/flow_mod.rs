// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow-mod semantics: add with replacement, modify with upsert, and
//! idempotent removal, checked through the public pipeline surface.

use common::*;
use ofpipe::api::FlowModError;
use ofpipe::api::OF10_NON_WILDCARDED_PRIORITY_FLAG;
use ofpipe::api::ValidationError;
use ofpipe_test_utils as common;
use std::net::Ipv4Addr;

const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

fn one_entry_table() -> (Pipeline, RecordingHooks) {
    let cfg = PipelineConfig {
        num_tables: 1,
        tables: vec![TableConfig { max_entries: Some(1), ..Default::default() }],
        ..Default::default()
    };
    pipeline(&cfg)
}

fn all_stats(p: &Pipeline) -> Vec<ofpipe::api::FlowStatsEntry> {
    p.get_flow_stats(&FlowFilter::default()).unwrap()
}

// A full table still accepts an entry that replaces an existing one,
// and the replacement inherits the counters of what it replaced.
#[test]
fn capacity_and_replacement() {
    let (p, hooks) = one_entry_table();

    let a = output_entry(10, vec![Match::in_port(1)], 2).with_notify();
    p.add_flow_entry(0, a, false, false).unwrap();
    for _ in 0..3 {
        let res = p.process_packet(tcp4_pkt(1, SRC, DST, 1000, 80));
        assert_eq!(res.outputs, vec![2]);
    }

    let b = output_entry(5, vec![Match::in_port(9)], 3);
    assert_eq!(
        p.add_flow_entry(0, b, false, false),
        Err(FlowModError::Capacity { table_id: 0, max_entries: 1 })
    );

    let a2 = output_entry(10, vec![Match::in_port(1)], 4);
    p.add_flow_entry(0, a2, false, false).unwrap();

    let stats = all_stats(&p);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].packet_count, 3);
    assert_eq!(stats[0].byte_count, 3 * u64::from(PKT_LEN));

    let res = p.process_packet(tcp4_pkt(1, SRC, DST, 1000, 80));
    assert_eq!(res.outputs, vec![4]);

    // The replaced entry is gone without a removal notification.
    assert!(hooks.flow_removed().is_empty());
    assert!(hooks.events().contains(&HookEvent::FlowRemove { priority: 10 }));
}

#[test]
fn replacement_with_reset_counts() {
    let (p, _) = one_entry_table();
    p.add_flow_entry(0, output_entry(10, vec![], 2), false, false).unwrap();
    p.process_packet(eth_pkt(1, GUEST_MAC, GUEST_MAC2));

    p.add_flow_entry(0, output_entry(10, vec![], 3), false, true).unwrap();
    assert_eq!(all_stats(&p)[0].packet_count, 0);
}

#[test]
fn overlap_check() {
    let (p, _) = pipeline(&PipelineConfig::default());
    let web = output_entry(
        100,
        vec![Match::eth_type(ETHER_TYPE_IPV4), Match::ip_proto(6), Match::tcp_dst(80)],
        1,
    );
    p.add_flow_entry(0, web, true, false).unwrap();

    // Same priority, and a packet to 10.0.0.2:80 matches both.
    let host = output_entry(
        100,
        vec![Match::eth_type(ETHER_TYPE_IPV4), Match::ipv4_dst(DST, 32)],
        2,
    );
    assert_eq!(
        p.add_flow_entry(0, host.clone(), true, false),
        Err(FlowModError::Overlap { table_id: 0, priority: 100 })
    );

    // Without the check the same entry goes in.
    p.add_flow_entry(0, host, false, false).unwrap();

    // A different priority never overlaps.
    let lower = output_entry(50, vec![Match::tcp_dst(80)], 3);
    p.add_flow_entry(0, lower, true, false).unwrap();

    // Disjoint on a shared field.
    let ssh = output_entry(
        100,
        vec![Match::eth_type(ETHER_TYPE_IPV4), Match::ip_proto(6), Match::tcp_dst(22)],
        4,
    );
    let ssh = FlowEntry {
        matches: ssh.matches.with(Match::ipv4_dst(Ipv4Addr::new(10, 9, 9, 9), 32)),
        ..ssh
    };
    p.add_flow_entry(0, ssh, true, false).unwrap();
    assert_eq!(p.tables()[0].len(), 4);
}

#[test]
fn modify_upserts_when_nothing_matches() {
    let (p, hooks) = pipeline(&PipelineConfig::default());
    let tmpl = output_entry(7, vec![Match::in_port(3)], 9);
    p.modify_flow_entry(0, tmpl, false, false).unwrap();

    assert_eq!(p.tables()[0].len(), 1);
    assert_eq!(hooks.events(), vec![HookEvent::FlowAdd { priority: 7 }]);
    let res = p.process_packet(eth_pkt(3, GUEST_MAC, GUEST_MAC2));
    assert_eq!(res.outputs, vec![9]);
}

#[test]
fn modify_selects_by_containment() {
    let (p, hooks) = pipeline(&PipelineConfig::default());
    let http = vec![Match::in_port(1), Match::ip_proto(6), Match::tcp_dst(80)];
    let https = vec![Match::in_port(1), Match::ip_proto(6), Match::tcp_dst(443)];
    p.add_flow_entry(0, output_entry(10, http, 2), false, false).unwrap();
    p.add_flow_entry(0, output_entry(20, https, 2), false, false).unwrap();
    p.add_flow_entry(0, output_entry(30, vec![Match::in_port(5)], 2), false, false)
        .unwrap();
    hooks.take();

    // Non-strict: every entry within in_port=1, whatever its priority.
    let tmpl = output_entry(0, vec![Match::in_port(1)], 8);
    p.modify_flow_entry(0, tmpl, false, false).unwrap();
    assert_eq!(
        hooks.take(),
        vec![
            HookEvent::FlowModify { priority: 20 },
            HookEvent::FlowModify { priority: 10 },
        ]
    );

    let res = p.process_packet(tcp4_pkt(1, SRC, DST, 1000, 443));
    assert_eq!(res.outputs, vec![8]);
    let res = p.process_packet(tcp4_pkt(5, SRC, DST, 1000, 443));
    assert_eq!(res.outputs, vec![2]);
    assert_eq!(p.tables()[0].len(), 3);

    // Strict: the priority must agree too, or the template is added.
    let exact = vec![Match::in_port(1), Match::ip_proto(6), Match::tcp_dst(80)];
    let tmpl = output_entry(11, exact.clone(), 6);
    p.modify_flow_entry(0, tmpl, true, false).unwrap();
    assert_eq!(p.tables()[0].len(), 4);

    let tmpl = output_entry(10, exact, 7);
    p.modify_flow_entry(0, tmpl, true, false).unwrap();
    assert_eq!(p.tables()[0].len(), 4);
    assert_eq!(hooks.take().last(), Some(&HookEvent::FlowModify { priority: 10 }));
}

#[test]
fn modify_keeps_or_resets_counters() {
    let (p, _) = pipeline(&PipelineConfig::default());
    p.add_flow_entry(0, output_entry(10, vec![Match::in_port(1)], 2), false, false)
        .unwrap();
    p.process_packet(eth_pkt(1, GUEST_MAC, GUEST_MAC2));

    let tmpl = output_entry(10, vec![Match::in_port(1)], 3);
    p.modify_flow_entry(0, tmpl.clone(), true, false).unwrap();
    assert_eq!(all_stats(&p)[0].packet_count, 1);

    p.modify_flow_entry(0, tmpl, true, true).unwrap();
    assert_eq!(all_stats(&p)[0].packet_count, 0);
}

#[test]
fn remove_is_idempotent_and_notifies() {
    let (p, hooks) = pipeline(&PipelineConfig { num_tables: 2, ..Default::default() });
    let e = output_entry(10, vec![Match::in_port(1), Match::tcp_dst(80)], 2)
        .with_notify()
        .with_cookie(0xc0ffee, u64::MAX);
    p.add_flow_entry(1, e, false, false).unwrap();
    p.add_flow_entry(1, output_entry(10, vec![Match::in_port(2)], 3), false, false)
        .unwrap();

    let nothing = output_entry(10, vec![Match::in_port(7)], 0);
    assert_eq!(
        p.remove_flow_entry(TABLE_ALL, &nothing, false, PORT_ANY, GROUP_ANY),
        Ok(0)
    );

    // The out-port filter keeps the entry sending to port 2.
    let by_port = FlowEntry::new(0, FlowMatch::new(), InstructionSet::new());
    assert_eq!(p.remove_flow_entry(1, &by_port, false, 3, GROUP_ANY), Ok(1));
    assert!(hooks.flow_removed().is_empty());

    // A cookie mismatch under the mask selects nothing.
    let wrong_cookie = by_port.clone().with_cookie(0xbad, 0xfff);
    assert_eq!(
        p.remove_flow_entry(1, &wrong_cookie, false, PORT_ANY, GROUP_ANY),
        Ok(0)
    );

    let right_cookie = by_port.clone().with_cookie(0xfee, 0xfff);
    assert_eq!(
        p.remove_flow_entry(1, &right_cookie, false, PORT_ANY, GROUP_ANY),
        Ok(1)
    );
    assert_eq!(hooks.flow_removed(), vec![(RemovalReason::Delete, 10)]);

    assert_eq!(
        p.remove_flow_entry(1, &right_cookie, false, PORT_ANY, GROUP_ANY),
        Ok(0)
    );
}

#[test]
fn remove_strict_needs_exact_match_set() {
    let (p, _) = pipeline(&PipelineConfig::default());
    let matches = vec![Match::in_port(1), Match::tcp_dst(80)];
    p.add_flow_entry(0, output_entry(10, matches.clone(), 2), false, false).unwrap();

    let wider = output_entry(10, vec![Match::in_port(1)], 2);
    assert_eq!(p.remove_flow_entry(0, &wider, true, PORT_ANY, GROUP_ANY), Ok(0));

    let other_prio = output_entry(11, matches.clone(), 2);
    assert_eq!(p.remove_flow_entry(0, &other_prio, true, PORT_ANY, GROUP_ANY), Ok(0));

    let exact = output_entry(10, matches, 2);
    assert_eq!(p.remove_flow_entry(0, &exact, true, PORT_ANY, GROUP_ANY), Ok(1));
    assert_eq!(p.tables()[0].len(), 0);
}

#[test]
fn rejected_entries_leave_table_alone() {
    let cfg = PipelineConfig { version: OfVersion::V12, ..Default::default() };
    let (p, hooks) = pipeline(&cfg);
    p.add_flow_entry(0, output_entry(1, vec![], 1), false, false).unwrap();
    hooks.take();

    let meter = FlowEntry::new(
        5,
        FlowMatch::new(),
        InstructionSet::new().with(Instruction::Meter(1)),
    );
    assert_eq!(
        p.add_flow_entry(0, meter, false, false),
        Err(FlowModError::Validation(ValidationError::UnsupportedInstruction(
            "METER"
        )))
    );

    let masked_port = output_entry(5, vec![Match::new(MatchField::InPort, 0, 0xf0)], 1);
    assert!(matches!(
        p.add_flow_entry(0, masked_port, false, false),
        Err(FlowModError::Validation(ValidationError::NotWildcardable { .. }))
    ));

    assert!(matches!(
        p.add_flow_entry(9, output_entry(5, vec![], 1), false, false),
        Err(FlowModError::BadTable { table_id: 9 })
    ));

    assert_eq!(p.tables()[0].len(), 1);
    assert!(hooks.events().is_empty());
}

#[test]
fn of10_exact_entries_outrank_wildcards() {
    let cfg = PipelineConfig { version: OfVersion::V10, num_tables: 1, ..Default::default() };
    let (p, _) = pipeline(&cfg);

    // Higher nominal priority, but wildcarded.
    let oui = MacAddr::from_const([0xff, 0xff, 0xff, 0, 0, 0]);
    let wild = output_entry(1000, vec![Match::eth_dst_masked(GW_MAC, oui)], 1);
    p.add_flow_entry(0, wild, false, false).unwrap();
    let exact = output_entry(10, vec![Match::in_port(1)], 2);
    p.add_flow_entry(0, exact, false, false).unwrap();

    let res = p.process_packet(tcp4_pkt(1, SRC, DST, 1000, 80));
    assert_eq!(res.outputs, vec![2]);

    let stats = all_stats(&p);
    assert_eq!(stats[0].priority, 10 | OF10_NON_WILDCARDED_PRIORITY_FLAG);
    assert_eq!(stats[1].priority, 1000);

    // Strict deletes see the same adjusted priority.
    let tmpl = output_entry(10, vec![Match::in_port(1)], 2);
    assert_eq!(p.remove_flow_entry(0, &tmpl, true, PORT_ANY, GROUP_ANY), Ok(1));
}

#[test]
fn flow_stats_filters() {
    let (p, _) = pipeline(&PipelineConfig { num_tables: 3, ..Default::default() });
    p.add_flow_entry(0, output_entry(1, vec![Match::in_port(1)], 2).with_cookie(1, 0), false, false)
        .unwrap();
    p.add_flow_entry(2, output_entry(1, vec![Match::in_port(1), Match::tcp_dst(80)], 3), false, false)
        .unwrap();
    p.add_flow_entry(2, output_entry(1, vec![Match::in_port(2)], 3), false, false)
        .unwrap();

    assert_eq!(all_stats(&p).len(), 3);

    let in1 = FlowFilter {
        matches: FlowMatch::new().with(Match::in_port(1)),
        ..Default::default()
    };
    let stats = p.get_flow_stats(&in1).unwrap();
    assert_eq!(stats.iter().map(|s| s.table_id).collect::<Vec<_>>(), vec![0, 2]);

    let cookie = FlowFilter { cookie: 1, cookie_mask: u64::MAX, ..Default::default() };
    assert_eq!(p.get_flow_stats(&cookie).unwrap().len(), 1);

    let port3 = FlowFilter { out_port: 3, ..FlowFilter::table(2) };
    let agg = p.get_flow_aggregate_stats(&port3).unwrap();
    assert_eq!(agg.flow_count, 2);

    assert_eq!(
        p.get_flow_stats(&FlowFilter::table(3)),
        Err(FlowModError::BadTable { table_id: 3 })
    );
}

#[test]
fn of10_overlap_compares_wire_priority() {
    let cfg = PipelineConfig { version: OfVersion::V10, num_tables: 1, ..Default::default() };
    let (p, _) = pipeline(&cfg);

    // Installed at 10 with the exact-match flag set.
    p.add_flow_entry(0, output_entry(10, vec![Match::in_port(1)], 2), false, false)
        .unwrap();

    // Fully wildcarded at the same wire priority.
    let any = output_entry(10, vec![], 3);
    assert!(matches!(
        p.add_flow_entry(0, any.clone(), true, false),
        Err(FlowModError::Overlap { table_id: 0, .. })
    ));

    let lower = output_entry(9, vec![], 3);
    p.add_flow_entry(0, lower, true, false).unwrap();
    assert_eq!(p.tables()[0].len(), 2);
}

#[test]
fn of10_replacement_resets_counters() {
    let cfg = PipelineConfig { version: OfVersion::V10, num_tables: 1, ..Default::default() };
    let (p, _) = pipeline(&cfg);
    p.add_flow_entry(0, output_entry(10, vec![Match::in_port(1)], 2), false, false)
        .unwrap();
    for _ in 0..3 {
        p.process_packet(tcp4_pkt(1, SRC, DST, 1000, 80));
    }
    assert_eq!(all_stats(&p)[0].packet_count, 3);

    p.add_flow_entry(0, output_entry(10, vec![Match::in_port(1)], 4), false, false)
        .unwrap();
    let stats = all_stats(&p);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].packet_count, 0);
    assert_eq!(stats[0].byte_count, 0);
}

#[test]
fn installed_entry_display() {
    let (p, _) = pipeline(&PipelineConfig::default());
    p.add_flow_entry(0, output_entry(10, vec![Match::in_port(1)], 2), false, false)
        .unwrap();

    let shown = p.tables()[0].entries()[0].to_string();
    assert!(shown.starts_with("table=0 priority=10 "), "{shown}");
    assert!(shown.contains(" => "), "{shown}");
}
