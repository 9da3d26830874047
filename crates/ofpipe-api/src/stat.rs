// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types for reporting flow, table, and group statistics.

use super::GroupType;
use super::MatchField;
use super::MatchingAlgorithmKind;
use alloc::string::String;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PacketCounter {
    pub packets: u64,
    pub bytes: u64,
}

/// One predicate of a dumped flow entry.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MatchDump {
    pub field: MatchField,
    pub value: u128,
    pub mask: u128,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FlowStatsEntry {
    pub table_id: u8,
    pub priority: u32,
    pub cookie: u64,
    pub idle_timeout: u32,
    pub hard_timeout: u32,
    pub duration_sec: u64,
    pub duration_nsec: u32,
    pub packet_count: u64,
    pub byte_count: u64,
    pub matches: Vec<MatchDump>,
    pub instructions: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AggregateStats {
    pub packet_count: u64,
    pub byte_count: u64,
    pub flow_count: u32,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableStats {
    pub table_id: u8,
    pub name: String,
    pub algorithm: MatchingAlgorithmKind,
    pub active_count: u32,
    pub max_entries: u32,
    pub lookup_count: u64,
    pub matched_count: u64,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GroupStatsEntry {
    pub group_id: u32,
    pub group_type: GroupType,
    pub ref_count: u32,
    pub packet_count: u64,
    pub byte_count: u64,
    pub buckets: Vec<PacketCounter>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MeterStats {
    pub meter_id: u32,
    pub packet_count: u64,
    pub byte_count: u64,
}
