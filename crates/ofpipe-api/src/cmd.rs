// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Errors returned by the flow-mod and group-mod operations.

use super::MatchField;
use super::OfVersion;
use thiserror::Error;

/// A flow-mod was rejected. In every case the table is left exactly as
/// it was before the call.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum FlowModError {
    #[error("table {table_id} is full ({max_entries} entries)")]
    Capacity { table_id: u8, max_entries: u32 },

    #[error("entry overlaps an existing entry at priority {priority}")]
    Overlap { table_id: u8, priority: u32 },

    #[error("no such table: {table_id}")]
    BadTable { table_id: u8 },

    #[error("invalid flow entry: {0}")]
    Validation(#[from] ValidationError),
}

/// The precise capability or reference that a flow entry violated.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ValidationError {
    #[error("table {table_id} cannot match on {field}")]
    UnsupportedField { table_id: u8, field: MatchField },

    #[error("table {table_id} cannot wildcard {field}")]
    NotWildcardable { table_id: u8, field: MatchField },

    #[error("field {field} appears more than once")]
    DuplicateField { field: MatchField },

    #[error("{what} is not available in OpenFlow {version}")]
    VersionMismatch { what: &'static str, version: OfVersion },

    #[error("field {field} is not available in OpenFlow {version}")]
    FieldVersion { field: MatchField, version: OfVersion },

    #[error("instruction {0} not supported by table")]
    UnsupportedInstruction(&'static str),

    #[error("action {action} not supported in {list} list")]
    UnsupportedAction { action: &'static str, list: &'static str },

    #[error("metadata mask {mask:#x} exceeds table's {allowed:#x}")]
    MetadataMask { mask: u64, allowed: u64 },

    #[error("goto from table {from} to table {to} is not allowed")]
    BadGotoTable { from: u8, to: u8 },

    #[error("unknown group: {0}")]
    UnknownGroup(u32),

    #[error("output to port {0:#x} is not allowed here")]
    InvalidOutputPort(u32),

    #[error("timeout {timeout}s exceeds the timer range of {max_secs}s")]
    TimeoutTooLarge { timeout: u32, max_secs: u64 },
}

/// A group-mod was rejected. The group table is unchanged.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum GroupModError {
    #[error("group {0} already exists")]
    Exists(u32),

    #[error("unknown group: {0}")]
    UnknownGroup(u32),

    #[error("invalid group id: {0:#x}")]
    InvalidId(u32),

    #[error("group {group_id}: buckets may not reference other groups")]
    Chaining { group_id: u32 },

    #[error("group {group_id}: invalid bucket: {reason}")]
    InvalidBucket { group_id: u32, reason: &'static str },

    #[error("group {group_id} is referenced by {flows} flow entries")]
    StillReferenced { group_id: u32, flows: usize },

    #[error("invalid bucket actions: {0}")]
    Validation(#[from] ValidationError),
}
