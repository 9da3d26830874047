// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod hooks;

// Let's make our lives easier and pub use a bunch of stuff.
pub use hooks::HookEvent;
pub use hooks::RecordingHooks;
pub use ofpipe::api::GROUP_ALL;
pub use ofpipe::api::GROUP_ANY;
pub use ofpipe::api::GroupType;
pub use ofpipe::api::MacAddr;
pub use ofpipe::api::MatchField;
pub use ofpipe::api::MatchingAlgorithmKind;
pub use ofpipe::api::MissAction;
pub use ofpipe::api::OfVersion;
pub use ofpipe::api::PORT_ANY;
pub use ofpipe::api::PORT_CONTROLLER;
pub use ofpipe::api::PORT_TABLE;
pub use ofpipe::api::PacketInReason;
pub use ofpipe::api::PipelineConfig;
pub use ofpipe::api::RemovalReason;
pub use ofpipe::api::TABLE_ALL;
pub use ofpipe::api::TableConfig;
pub use ofpipe::ddi::time::Moment;
pub use ofpipe::engine::action::Action;
pub use ofpipe::engine::action::ActionList;
pub use ofpipe::engine::flow_entry::FlowEntry;
pub use ofpipe::engine::group_table::Bucket;
pub use ofpipe::engine::group_table::GroupDesc;
pub use ofpipe::engine::instruction::Instruction;
pub use ofpipe::engine::instruction::InstructionSet;
pub use ofpipe::engine::packet::ETHER_TYPE_IPV4;
pub use ofpipe::engine::packet::ETHER_TYPE_IPV6;
pub use ofpipe::engine::packet::IP_PROTO_TCP;
pub use ofpipe::engine::packet::IP_PROTO_UDP;
pub use ofpipe::engine::packet::Ip;
pub use ofpipe::engine::packet::IpAddrs;
pub use ofpipe::engine::packet::L4;
pub use ofpipe::engine::packet::Packet;
pub use ofpipe::engine::packet::PacketMatches;
pub use ofpipe::engine::packet::Vlan;
pub use ofpipe::engine::pipeline::DropReason;
pub use ofpipe::engine::pipeline::FlowFilter;
pub use ofpipe::engine::pipeline::Pipeline;
pub use ofpipe::engine::pipeline::ProcessResult;
pub use ofpipe::engine::predicate::FlowMatch;
pub use ofpipe::engine::predicate::Match;
pub use ofpipe::provider::NullLog;
pub use ofpipe::provider::Providers;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::time::Duration;

pub const GUEST_MAC: MacAddr = MacAddr::from_const([0xa8, 0x40, 0x25, 0xf7, 0, 1]);
pub const GUEST_MAC2: MacAddr = MacAddr::from_const([0xa8, 0x40, 0x25, 0xf7, 0, 2]);
pub const GW_MAC: MacAddr = MacAddr::from_const([0xa8, 0x40, 0x25, 0xff, 0x77, 0x77]);

/// Length given to every packet built here.
pub const PKT_LEN: u32 = 100;

/// Build a pipeline whose hooks record every event, with timers
/// counting from `now`.
pub fn pipeline_at(cfg: &PipelineConfig, now: Moment) -> (Pipeline, RecordingHooks) {
    let hooks = RecordingHooks::default();
    let providers =
        Providers { log: Box::new(NullLog), hooks: Box::new(hooks.clone()) };
    let p = Pipeline::new_at(cfg, providers, now).unwrap();
    (p, hooks)
}

pub fn pipeline(cfg: &PipelineConfig) -> (Pipeline, RecordingHooks) {
    pipeline_at(cfg, Moment::now())
}

/// A pipeline of `num_tables` tables of the given version, all using
/// `algorithm`.
pub fn pipeline_with(
    version: OfVersion,
    num_tables: u16,
    algorithm: MatchingAlgorithmKind,
    now: Moment,
) -> (Pipeline, RecordingHooks) {
    let cfg = PipelineConfig {
        version,
        num_tables,
        default_table: TableConfig { algorithm, ..Default::default() },
        ..Default::default()
    };
    pipeline_at(&cfg, now)
}

pub fn after_ms(start: Moment, ms: u64) -> Moment {
    start + Duration::from_millis(ms)
}

/// An Ethernet frame carrying an unknown payload.
pub fn eth_pkt(in_port: u32, src: MacAddr, dst: MacAddr) -> Packet {
    let matches = PacketMatches {
        in_port,
        eth_src: src,
        eth_dst: dst,
        eth_type: 0x88b5,
        ..Default::default()
    };
    Packet::new(matches, PKT_LEN)
}

/// Tag `pkt` with VLAN `vid`.
pub fn tagged(mut pkt: Packet, vid: u16) -> Packet {
    pkt.matches.vlan = Some(Vlan { vid, pcp: 0 });
    pkt
}

fn ip4_pkt(in_port: u32, src: Ipv4Addr, dst: Ipv4Addr, l4: L4, proto: u8) -> Packet {
    let matches = PacketMatches {
        in_port,
        eth_src: GUEST_MAC,
        eth_dst: GW_MAC,
        eth_type: ETHER_TYPE_IPV4,
        ip: Some(Ip {
            dscp: 0,
            ecn: 0,
            proto,
            ttl: 64,
            addrs: IpAddrs::V4 { src, dst },
        }),
        l4: Some(l4),
        ..Default::default()
    };
    Packet::new(matches, PKT_LEN)
}

pub fn tcp4_pkt(
    in_port: u32,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
) -> Packet {
    ip4_pkt(in_port, src, dst, L4::Tcp { src: sport, dst: dport }, IP_PROTO_TCP)
}

pub fn udp4_pkt(
    in_port: u32,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
) -> Packet {
    ip4_pkt(in_port, src, dst, L4::Udp { src: sport, dst: dport }, IP_PROTO_UDP)
}

pub fn tcp6_pkt(
    in_port: u32,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    sport: u16,
    dport: u16,
) -> Packet {
    let matches = PacketMatches {
        in_port,
        eth_src: GUEST_MAC,
        eth_dst: GW_MAC,
        eth_type: ETHER_TYPE_IPV6,
        ip: Some(Ip {
            dscp: 0,
            ecn: 0,
            proto: IP_PROTO_TCP,
            ttl: 64,
            addrs: IpAddrs::V6 { src, dst, flabel: 0, exthdr: 0 },
        }),
        l4: Some(L4::Tcp { src: sport, dst: dport }),
        ..Default::default()
    };
    Packet::new(matches, PKT_LEN)
}

/// An entry applying `actions`.
pub fn apply_entry(priority: u32, matches: Vec<Match>, actions: Vec<Action>) -> FlowEntry {
    FlowEntry::new(priority, FlowMatch::from(matches), InstructionSet::apply(actions))
}

/// An entry sending matching packets to `port`.
pub fn output_entry(priority: u32, matches: Vec<Match>, port: u32) -> FlowEntry {
    apply_entry(priority, matches, vec![Action::output(port)])
}
