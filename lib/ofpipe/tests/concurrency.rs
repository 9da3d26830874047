// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet threads running against flow-mods, group changes and expiry
//! sweeps on another thread.

use common::*;
use ofpipe::api::FlowModError;
use ofpipe::api::GroupModError;
use ofpipe::api::ValidationError;
use ofpipe_test_utils as common;
use std::net::Ipv4Addr;
use std::thread;

const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const WORKERS: usize = 4;
const PER_WORKER: usize = 2000;

fn web_pkt() -> Packet {
    tcp4_pkt(1, SRC, DST, 1000, 80)
}

#[test]
fn packets_during_flow_mods_and_sweeps() {
    let t0 = Moment::now();
    let cfg = PipelineConfig { num_tables: 1, ..Default::default() };
    let (p, _) = pipeline_at(&cfg, t0);
    p.add_flow_entry_at(0, output_entry(0, vec![], 1), false, false, t0).unwrap();

    let web = vec![Match::in_port(1), Match::ip_proto(IP_PROTO_TCP), Match::tcp_dst(80)];

    thread::scope(|s| {
        for _ in 0..WORKERS {
            s.spawn(|| {
                for _ in 0..PER_WORKER {
                    let res = p.process_packet(web_pkt());
                    assert_eq!(res.outputs.len(), 1, "{res:?}");
                    assert!([1, 2, 3].contains(&res.outputs[0]), "{res:?}");
                }
            });
        }

        s.spawn(|| {
            for i in 0..200 {
                let now = after_ms(t0, i * 250);
                let e = output_entry(10, web.clone(), 2).with_hard_timeout(1);
                p.add_flow_entry_at(0, e, false, false, now).unwrap();

                let tmpl = output_entry(0, vec![Match::in_port(1)], 3);
                p.modify_flow_entry_at(0, tmpl, false, false, now).unwrap();

                if i % 3 == 0 {
                    let exact = output_entry(10, web.clone(), 0);
                    p.remove_flow_entry(0, &exact, true, PORT_ANY, GROUP_ANY)
                        .unwrap();
                }
                p.expire_flows_at(now);
            }
        });
    });

    let total = (WORKERS * PER_WORKER) as u64;
    let stats = &p.get_table_stats()[0];
    assert_eq!(stats.lookup_count, total);
    assert_eq!(stats.matched_count, total);

    // Every packet was charged to exactly one entry, including those
    // charged to entries removed since.
    let live: u64 = p
        .get_flow_stats(&FlowFilter::default())
        .unwrap()
        .iter()
        .map(|s| s.packet_count)
        .sum();
    assert!(live <= total);
}

#[test]
fn replacement_keeps_every_hit() {
    let cfg = PipelineConfig { num_tables: 1, ..Default::default() };
    let (p, _) = pipeline(&cfg);
    p.add_flow_entry(0, output_entry(10, vec![Match::in_port(1)], 2), false, false)
        .unwrap();

    thread::scope(|s| {
        for _ in 0..WORKERS {
            s.spawn(|| {
                for _ in 0..PER_WORKER {
                    let res = p.process_packet(web_pkt());
                    assert_eq!(res.outputs.len(), 1, "{res:?}");
                }
            });
        }

        s.spawn(|| {
            for i in 0..100 {
                let e = output_entry(10, vec![Match::in_port(1)], 2 + i % 2);
                p.add_flow_entry(0, e, false, false).unwrap();
            }
        });
    });

    let stats = p.get_flow_stats(&FlowFilter::default()).unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].packet_count, (WORKERS * PER_WORKER) as u64);
    assert_eq!(
        stats[0].byte_count,
        (WORKERS * PER_WORKER) as u64 * u64::from(PKT_LEN)
    );
}

#[test]
fn group_delete_never_strands_entries() {
    let (p, _) = pipeline(&PipelineConfig::default());
    let group = || {
        GroupDesc::new(1, GroupType::All, vec![Bucket::new(vec![Action::output(2)])])
    };
    p.group_add(group()).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..500 {
                let e = apply_entry(1, vec![], vec![Action::Group(1)]);
                match p.add_flow_entry(0, e, false, false) {
                    Ok(_) => {}
                    Err(FlowModError::Validation(ValidationError::UnknownGroup(1))) => {}
                    Err(e) => panic!("unexpected {e}"),
                }
            }
        });

        s.spawn(|| {
            for _ in 0..500 {
                p.purge_group_references(1);
                match p.group_delete(1) {
                    Ok(ids) => {
                        assert_eq!(ids, vec![1]);
                        // No entry may point at the group once it is gone.
                        assert_eq!(p.group_ref_count(1), 0);
                        p.group_add(group()).unwrap();
                    }
                    Err(GroupModError::StillReferenced { group_id: 1, .. }) => {}
                    Err(e) => panic!("unexpected {e}"),
                }
            }
        });
    });

    assert!(p.groups().contains(1));
}
