// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Scenario files and their replay.
//!
//! Matches, instructions and actions are written in their textual
//! form (`IN_PORT=1`, `apply:output:2`) so that scenarios stay
//! readable in both RON and JSON.

use crate::hooks::LogHooks;
use ofpipe::api::ConfigError;
use ofpipe::api::GROUP_ANY;
use ofpipe::api::GroupModError;
use ofpipe::api::GroupType;
use ofpipe::api::MacAddr;
use ofpipe::api::PORT_ANY;
use ofpipe::api::PipelineConfig;
use ofpipe::ddi::time::Moment;
use ofpipe::engine::action::Action;
use ofpipe::engine::action::ActionList;
use ofpipe::engine::flow_entry::FlowEntry;
use ofpipe::engine::group_table::Bucket;
use ofpipe::engine::group_table::GroupDesc;
use ofpipe::engine::instruction::Instruction;
use ofpipe::engine::instruction::InstructionSet;
use ofpipe::engine::packet::ETHER_TYPE_IPV4;
use ofpipe::engine::packet::ETHER_TYPE_IPV6;
use ofpipe::engine::packet::Ip;
use ofpipe::engine::packet::IpAddrs;
use ofpipe::engine::packet::L4;
use ofpipe::engine::packet::Packet;
use ofpipe::engine::packet::PacketMatches;
use ofpipe::engine::packet::Vlan;
use ofpipe::engine::pipeline::Pipeline;
use ofpipe::engine::pipeline::ProcessResult;
use ofpipe::engine::predicate::FlowMatch;
use ofpipe::engine::predicate::Match;
use ofpipe::provider::Providers;
use ofpipe::provider::SlogLog;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use std::ffi::OsStr;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown scenario format {0:?}, expected .ron or .json")]
    Format(String),

    #[error("failed to parse scenario: {0}")]
    Parse(String),

    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("flow #{index}: {msg}")]
    Flow { index: usize, msg: String },

    #[error("group {id}: {msg}")]
    Group { id: u32, msg: String },

    #[error("packet #{index}: {msg}")]
    Packet { index: usize, msg: String },
}

fn parse_all<T: FromStr<Err = String>>(items: &[String]) -> Result<Vec<T>, String> {
    items.iter().map(|s| s.parse::<T>()).collect()
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum FlowCommand {
    #[default]
    Add,
    Modify,
    ModifyStrict,
    Delete,
    DeleteStrict,
}

/// One flow-mod.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct FlowSpec {
    pub at_ms: u64,
    pub command: FlowCommand,
    pub table: u8,
    pub priority: u32,
    pub matches: Vec<String>,
    pub instructions: Vec<String>,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub idle_timeout: u32,
    pub hard_timeout: u32,
    pub notify: bool,
    pub check_overlap: bool,
    pub reset_counts: bool,
    /// Delete filters.
    pub out_port: u32,
    pub out_group: u32,
}

impl Default for FlowSpec {
    fn default() -> Self {
        Self {
            at_ms: 0,
            command: FlowCommand::Add,
            table: 0,
            priority: 0,
            matches: Vec::new(),
            instructions: Vec::new(),
            cookie: 0,
            cookie_mask: 0,
            idle_timeout: 0,
            hard_timeout: 0,
            notify: false,
            check_overlap: false,
            reset_counts: false,
            out_port: PORT_ANY,
            out_group: GROUP_ANY,
        }
    }
}

impl FlowSpec {
    pub fn entry(&self) -> Result<FlowEntry, String> {
        let matches = FlowMatch::from(parse_all::<Match>(&self.matches)?);
        let insts =
            InstructionSet::from(parse_all::<Instruction>(&self.instructions)?);
        let mut entry = FlowEntry::new(self.priority, matches, insts)
            .with_cookie(self.cookie, self.cookie_mask)
            .with_idle_timeout(self.idle_timeout)
            .with_hard_timeout(self.hard_timeout);
        if self.notify {
            entry = entry.with_notify();
        }
        Ok(entry)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct BucketSpec {
    pub weight: u16,
    pub watch_port: Option<u32>,
    pub watch_group: Option<u32>,
    pub actions: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GroupSpec {
    pub id: u32,
    pub group_type: GroupType,
    #[serde(default)]
    pub buckets: Vec<BucketSpec>,
}

impl GroupSpec {
    pub fn desc(&self) -> Result<GroupDesc, String> {
        let buckets = self
            .buckets
            .iter()
            .map(|b| {
                let actions = parse_all::<Action>(&b.actions)?;
                let mut bucket = Bucket::new(actions).with_weight(b.weight);
                if let Some(port) = b.watch_port {
                    bucket = bucket.with_watch_port(port);
                }
                if let Some(group) = b.watch_group {
                    bucket = bucket.with_watch_group(group);
                }
                Ok(bucket)
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(GroupDesc::new(self.id, self.group_type, buckets))
    }
}

fn default_ttl() -> u8 {
    64
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IpSpec {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub proto: u8,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
}

/// A packet, sent `count` times, either into the pipeline or, with
/// `packet_out`, as a controller packet-out with the given actions.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PacketSpec {
    pub at_ms: u64,
    pub count: u32,
    pub len: u32,
    pub in_port: u32,
    pub eth_src: Option<String>,
    pub eth_dst: Option<String>,
    /// Defaults from `ip`, or to an experimental ethertype.
    pub eth_type: Option<u16>,
    pub vlan: Option<u16>,
    pub ip: Option<IpSpec>,
    pub l4: Option<L4>,
    pub packet_out: Option<Vec<String>>,
}

impl Default for PacketSpec {
    fn default() -> Self {
        Self {
            at_ms: 0,
            count: 1,
            len: 64,
            in_port: 1,
            eth_src: None,
            eth_dst: None,
            eth_type: None,
            vlan: None,
            ip: None,
            l4: None,
            packet_out: None,
        }
    }
}

impl PacketSpec {
    pub fn packet(&self) -> Result<Packet, String> {
        let mac = |s: &Option<String>| match s {
            Some(s) => s.parse::<MacAddr>(),
            None => Ok(MacAddr::ZERO),
        };

        let ip = match self.ip {
            None => None,
            Some(spec) => {
                let addrs = match (spec.src, spec.dst) {
                    (IpAddr::V4(src), IpAddr::V4(dst)) => IpAddrs::V4 { src, dst },
                    (IpAddr::V6(src), IpAddr::V6(dst)) => {
                        IpAddrs::V6 { src, dst, flabel: 0, exthdr: 0 }
                    }
                    _ => return Err("mixed IPv4 and IPv6 addresses".to_string()),
                };
                Some(Ip { dscp: 0, ecn: 0, proto: spec.proto, ttl: spec.ttl, addrs })
            }
        };

        let eth_type = match (self.eth_type, &ip) {
            (Some(ty), _) => ty,
            (None, Some(Ip { addrs: IpAddrs::V4 { .. }, .. })) => ETHER_TYPE_IPV4,
            (None, Some(Ip { addrs: IpAddrs::V6 { .. }, .. })) => ETHER_TYPE_IPV6,
            (None, None) => 0x88b5,
        };

        let matches = PacketMatches {
            in_port: self.in_port,
            eth_src: mac(&self.eth_src)?,
            eth_dst: mac(&self.eth_dst)?,
            eth_type,
            vlan: self.vlan.map(|vid| Vlan { vid, pcp: 0 }),
            ip,
            l4: self.l4,
            ..Default::default()
        };
        Ok(Packet::new(matches, self.len))
    }
}

/// A port going up or down.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PortEvent {
    pub at_ms: u64,
    pub port: u32,
    pub live: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Scenario {
    pub pipeline: PipelineConfig,
    pub groups: Vec<GroupSpec>,
    pub flows: Vec<FlowSpec>,
    pub packets: Vec<PacketSpec>,
    pub ports: Vec<PortEvent>,
    /// Times, in milliseconds from the start, at which the timers of
    /// every table are run.
    pub sweeps: Vec<u64>,
}

/// What happened to one packet of the scenario.
#[derive(Clone, Debug)]
pub struct PacketOutcome {
    pub index: usize,
    pub at_ms: u64,
    pub result: ProcessResult,
}

pub struct Report {
    pub pipeline: Pipeline,
    pub packets: Vec<PacketOutcome>,
    /// Entries removed by the timer sweeps.
    pub expired: usize,
    /// Rejected flow-mods and packet-outs. These do not stop the
    /// replay.
    pub errors: Vec<String>,
    /// The moment of the last step.
    pub end: Moment,
}

// Ordered so that, at equal times, time passes before anything else
// happens and flows go in before packets use them.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Step {
    Sweep,
    Port(usize),
    Flow(usize),
    Packet(usize),
}

impl Scenario {
    /// Load a scenario, choosing the format from the file extension.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            ScenarioError::Io { path: path.display().to_string(), source }
        })?;

        match path.extension().and_then(OsStr::to_str) {
            Some("ron") => Self::from_ron(&text),
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| ScenarioError::Parse(e.to_string())),
            other => Err(ScenarioError::Format(other.unwrap_or("").to_string())),
        }
    }

    pub fn from_ron(text: &str) -> Result<Self, ScenarioError> {
        ron::from_str(text).map_err(|e| ScenarioError::Parse(e.to_string()))
    }

    /// Validate the pipeline configuration and parse every textual
    /// form in the scenario, without running it.
    pub fn check(&self) -> Result<(), ScenarioError> {
        self.pipeline.validate()?;

        for g in &self.groups {
            g.desc().map_err(|msg| ScenarioError::Group { id: g.id, msg })?;
        }

        for (index, f) in self.flows.iter().enumerate() {
            f.entry().map_err(|msg| ScenarioError::Flow { index, msg })?;
        }

        for (index, p) in self.packets.iter().enumerate() {
            p.packet().map_err(|msg| ScenarioError::Packet { index, msg })?;
            if let Some(acts) = &p.packet_out {
                parse_all::<Action>(acts)
                    .map_err(|msg| ScenarioError::Packet { index, msg })?;
            }
        }

        Ok(())
    }

    fn timeline(&self) -> Vec<(u64, Step)> {
        let mut steps: Vec<(u64, Step)> = self
            .sweeps
            .iter()
            .map(|ms| (*ms, Step::Sweep))
            .chain(self.ports.iter().enumerate().map(|(i, p)| (p.at_ms, Step::Port(i))))
            .chain(self.flows.iter().enumerate().map(|(i, f)| (f.at_ms, Step::Flow(i))))
            .chain(
                self.packets.iter().enumerate().map(|(i, p)| (p.at_ms, Step::Packet(i))),
            )
            .collect();
        steps.sort();
        steps
    }

    /// Build the pipeline and replay the scenario against it.
    pub fn run(&self, log: &Logger) -> Result<Report, ScenarioError> {
        let t0 = Moment::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);

        let hooks = LogHooks::new(log.clone(), []);
        let providers = Providers {
            log: Box::new(SlogLog(log.clone())),
            hooks: Box::new(hooks.clone()),
        };
        let pipeline = Pipeline::new_at(&self.pipeline, providers, t0)?;

        for g in &self.groups {
            let desc = g.desc().map_err(|msg| ScenarioError::Group { id: g.id, msg })?;
            pipeline.group_add(desc).map_err(|e: GroupModError| {
                ScenarioError::Group { id: g.id, msg: e.to_string() }
            })?;
        }

        let mut report = Report {
            pipeline,
            packets: Vec::new(),
            expired: 0,
            errors: Vec::new(),
            end: t0,
        };

        for (ms, step) in self.timeline() {
            report.end = at(ms);
            match step {
                Step::Sweep => report.expired += report.pipeline.expire_flows_at(at(ms)),

                Step::Port(i) => {
                    let ev = &self.ports[i];
                    hooks.set_port_live(ev.port, ev.live);
                }

                Step::Flow(index) => {
                    if let Err(msg) = self.apply_flow(&report.pipeline, index, at(ms)) {
                        report.errors.push(format!("flow #{index}: {msg}"));
                    }
                }

                Step::Packet(index) => {
                    let spec = &self.packets[index];
                    let pkt = spec
                        .packet()
                        .map_err(|msg| ScenarioError::Packet { index, msg })?;
                    let actions = match &spec.packet_out {
                        Some(acts) => Some(ActionList::from(
                            parse_all::<Action>(acts)
                                .map_err(|msg| ScenarioError::Packet { index, msg })?,
                        )),
                        None => None,
                    };

                    for _ in 0..spec.count {
                        let result = match &actions {
                            None => report.pipeline.process_packet(pkt.clone()),
                            Some(acts) => {
                                match report.pipeline.process_packet_out(pkt.clone(), acts) {
                                    Ok(res) => res,
                                    Err(e) => {
                                        report.errors.push(format!("packet #{index}: {e}"));
                                        break;
                                    }
                                }
                            }
                        };
                        report.packets.push(PacketOutcome { index, at_ms: ms, result });
                    }
                }
            }
        }

        Ok(report)
    }

    fn apply_flow(
        &self,
        pipeline: &Pipeline,
        index: usize,
        now: Moment,
    ) -> Result<(), String> {
        let spec = &self.flows[index];
        let entry = spec.entry()?;

        let res = match spec.command {
            FlowCommand::Add => pipeline
                .add_flow_entry_at(
                    spec.table,
                    entry,
                    spec.check_overlap,
                    spec.reset_counts,
                    now,
                )
                .map(|_| ()),

            FlowCommand::Modify | FlowCommand::ModifyStrict => pipeline
                .modify_flow_entry_at(
                    spec.table,
                    entry,
                    spec.command == FlowCommand::ModifyStrict,
                    spec.reset_counts,
                    now,
                ),

            FlowCommand::Delete | FlowCommand::DeleteStrict => pipeline
                .remove_flow_entry(
                    spec.table,
                    &entry,
                    spec.command == FlowCommand::DeleteStrict,
                    spec.out_port,
                    spec.out_group,
                )
                .map(|_| ()),
        };

        res.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ofpipe::api::PacketInReason;
    use ofpipe::engine::pipeline::DropReason;

    fn discard() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    const SCENARIO: &str = r#"(
        pipeline: (num_tables: 2),
        groups: [
            (id: 1, group_type: FastFailover, buckets: [
                (watch_port: Some(2), actions: ["output:2"]),
                (watch_port: Some(3), actions: ["output:3"]),
            ]),
        ],
        flows: [
            (priority: 10, matches: ["IN_PORT=1"], instructions: ["goto:1"]),
            (table: 1, priority: 5, matches: ["ETH_TYPE=0x0800"], instructions: ["apply:group:1"]),
            (table: 1, priority: 1, instructions: ["apply:output:controller"], hard_timeout: 2, notify: true),
            (priority: 10, matches: ["IN_PORT=1", "IN_PORT=2"]),
        ],
        packets: [
            (in_port: 1, ip: Some((src: "10.0.0.1", dst: "10.0.0.2", proto: 17))),
            (at_ms: 1000, in_port: 1, count: 2),
            (at_ms: 1500, in_port: 1, ip: Some((src: "10.0.0.1", dst: "10.0.0.2", proto: 17))),
            (at_ms: 3000, in_port: 1),
        ],
        ports: [(at_ms: 1500, port: 2, live: false)],
        sweeps: [1000, 2000, 3000],
    )"#;

    #[test]
    fn replay() {
        let scenario = Scenario::from_ron(SCENARIO).unwrap();
        let report = scenario.run(&discard()).unwrap();

        // The duplicate field is rejected without stopping the replay.
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("flow #3"));

        let results: Vec<&ProcessResult> =
            report.packets.iter().map(|p| &p.result).collect();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].outputs, vec![2]);
        assert_eq!(results[1].packet_ins, vec![PacketInReason::ExplicitAction]);
        assert_eq!(results[3].outputs, vec![3]);

        // The catch-all expired at 2s.
        assert_eq!(report.expired, 1);
        assert_eq!(results[4].drop, Some(DropReason::TableMiss { table_id: 1 }));
    }

    #[test]
    fn bad_scenarios() {
        assert!(matches!(
            Scenario::from_ron("(flows: [(matches: 5)])"),
            Err(ScenarioError::Parse(_))
        ));

        let bad_match = Scenario {
            flows: vec![FlowSpec { matches: vec!["NOPE=1".into()], ..Default::default() }],
            ..Default::default()
        };
        let report = bad_match.run(&discard()).unwrap();
        assert_eq!(report.errors, vec!["flow #0: unknown field: NOPE".to_string()]);

        let bad_group = Scenario {
            groups: vec![GroupSpec {
                id: 1,
                group_type: GroupType::Indirect,
                buckets: vec![BucketSpec::default(), BucketSpec::default()],
            }],
            ..Default::default()
        };
        assert!(matches!(
            bad_group.run(&discard()),
            Err(ScenarioError::Group { id: 1, .. })
        ));

        assert!(matches!(
            bad_match.check(),
            Err(ScenarioError::Flow { index: 0, .. })
        ));

        assert!(matches!(
            Scenario::load(Path::new("scenario.toml")),
            Err(ScenarioError::Io { .. })
        ));
    }
}
