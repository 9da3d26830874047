// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Pipeline construction parameters.

use super::DEFAULT_MISS_SEND_LEN;
use super::MissAction;
use super::OfVersion;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Upper bound on the tables of one pipeline; table ids are a `u8` and
/// `0xff` is reserved to mean "all tables".
pub const MAX_TABLES: u16 = 255;

/// The lookup strategy bound to a flow table.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum MatchingAlgorithmKind {
    /// Walk the priority ordered entry list.
    #[default]
    Loop,
    /// Hash probe on destination MAC (and VLAN) plus a residual list.
    L2Hash,
    /// Prefix tree over canonically ordered predicates.
    Trie,
}

impl Display for MatchingAlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Loop => "loop",
            Self::L2Hash => "l2hash",
            Self::Trie => "trie",
        };

        write!(f, "{s}")
    }
}

impl core::str::FromStr for MatchingAlgorithmKind {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loop" => Ok(Self::Loop),
            "l2hash" => Ok(Self::L2Hash),
            "trie" => Ok(Self::Trie),
            _ => Err(format!("invalid matching algorithm: {s}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Number of slots in each table's timer ring. Together with
    /// `slot_ms` this bounds the longest timeout a table can hold.
    pub slots: u32,
    /// Width of one slot in milliseconds.
    pub slot_ms: u64,
}

impl TimerConfig {
    /// The longest timeout, in seconds, the ring can represent.
    pub fn max_timeout_secs(&self) -> u64 {
        u64::from(self.slots) * self.slot_ms / 1000
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { slots: 65536, slot_ms: 1000 }
    }
}

/// Per-table overrides. Anything left as `None` comes from the preset
/// of the pipeline's OpenFlow version.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TableConfig {
    pub algorithm: MatchingAlgorithmKind,
    pub max_entries: Option<u32>,
    pub miss: Option<MissAction>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    pub dpid: u64,
    pub version: OfVersion,
    pub num_tables: u16,
    pub miss_send_len: u16,
    pub timer: TimerConfig,
    /// Number of counter shards per countable object. Zero means one
    /// shard per available CPU.
    pub stat_shards: u16,
    /// Overrides for tables `0..tables.len()`. Remaining tables use
    /// `default_table`.
    pub tables: Vec<TableConfig>,
    pub default_table: TableConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: String::from("ofpipe0"),
            dpid: 0,
            version: OfVersion::default(),
            num_tables: 8,
            miss_send_len: DEFAULT_MISS_SEND_LEN,
            timer: TimerConfig::default(),
            stat_shards: 0,
            tables: Vec::new(),
            default_table: TableConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn table(&self, table_id: u8) -> &TableConfig {
        self.tables.get(usize::from(table_id)).unwrap_or(&self.default_table)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_tables == 0 || self.num_tables > MAX_TABLES {
            return Err(ConfigError::NumTables(self.num_tables));
        }

        if self.tables.len() > usize::from(self.num_tables) {
            return Err(ConfigError::TooManyOverrides {
                overrides: self.tables.len(),
                num_tables: self.num_tables,
            });
        }

        if self.timer.slots == 0 || self.timer.slot_ms == 0 {
            return Err(ConfigError::Timer);
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ConfigError {
    #[error("number of tables must be in 1..=255, got {0}")]
    NumTables(u16),

    #[error("{overrides} table overrides given for {num_tables} tables")]
    TooManyOverrides { overrides: usize, num_tables: u16 },

    #[error("timer ring needs at least one slot of non-zero width")]
    Timer,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.timer.max_timeout_secs(), 65536);
        assert_eq!(cfg.table(3).algorithm, MatchingAlgorithmKind::Loop);
    }

    #[test]
    fn bad_table_counts() {
        let cfg = PipelineConfig { num_tables: 0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::NumTables(0)));

        let cfg = PipelineConfig { num_tables: 256, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::NumTables(256)));

        let cfg = PipelineConfig {
            num_tables: 1,
            tables: vec![TableConfig::default(), TableConfig::default()],
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TooManyOverrides { .. })
        ));
    }

    #[test]
    fn parse_ron() {
        let text = r#"(
            name: "sw1",
            version: V10,
            num_tables: 2,
            tables: [(algorithm: L2Hash, max_entries: Some(16))],
            timer: (slots: 120),
        )"#;
        let cfg: PipelineConfig = ron::from_str(text).unwrap();
        assert_eq!(cfg.name, "sw1");
        assert_eq!(cfg.version, OfVersion::V10);
        assert_eq!(cfg.table(0).algorithm, MatchingAlgorithmKind::L2Hash);
        assert_eq!(cfg.table(0).max_entries, Some(16));
        assert_eq!(cfg.table(1).algorithm, MatchingAlgorithmKind::Loop);
        assert_eq!(cfg.timer.slots, 120);
        assert_eq!(cfg.timer.slot_ms, 1000);
        assert_eq!(cfg.miss_send_len, DEFAULT_MISS_SEND_LEN);
    }

    #[test]
    fn parse_json() {
        let text = r#"{"num_tables": 4, "default_table": {"algorithm": "Trie"}}"#;
        let cfg: PipelineConfig = serde_json::from_str(text).unwrap();
        assert_eq!(cfg.num_tables, 4);
        assert_eq!(cfg.table(2).algorithm, MatchingAlgorithmKind::Trie);
    }
}
