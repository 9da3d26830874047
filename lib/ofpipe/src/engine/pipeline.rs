// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The pipeline: the ordered flow tables of a switch plus its group
//! table, and the single entry point for packets.
//!
//! A packet starts in table 0. The instructions of the best entry of
//! each table it visits run in ladder order; a goto-table continues
//! in a later table once the ladder completes, otherwise the packet's
//! action set is executed and processing ends. A table miss follows
//! the table's miss action.
//!
//! Outputs and controller packet-ins are collected while an entry's
//! lock is held and handed to the platform only after it is released,
//! so a hook is free to call back into the pipeline.

use super::action::Action;
use super::action::ActionEffect;
use super::action::ActionList;
use super::action::is_valid_output_port;
use super::arena::EntryHandle;
use super::flow_entry::FlowEntry;
use super::flow_table::FlowTable;
use super::flow_table::TableCapabilities;
use super::flow_table::TableParams;
use super::group_table::GroupDesc;
use super::group_table::GroupTable;
use super::instruction::Instruction;
use super::instruction::InstructionSet;
use super::packet::Packet;
use super::predicate::FlowMatch;
use super::stat::ShardedCounter;
use super::stat::default_shards;
use crate::api::AggregateStats;
use crate::api::ConfigError;
use crate::api::FlowModError;
use crate::api::FlowStatsEntry;
use crate::api::GROUP_ALL;
use crate::api::GROUP_ANY;
use crate::api::GroupModError;
use crate::api::GroupStatsEntry;
use crate::api::MeterStats;
use crate::api::MissAction;
use crate::api::OfVersion;
use crate::api::PORT_ANY;
use crate::api::PORT_CONTROLLER;
use crate::api::PORT_IN_PORT;
use crate::api::PORT_TABLE;
use crate::api::PacketInReason;
use crate::api::PipelineConfig;
use crate::api::RemovalReason;
use crate::api::SwitchId;
use crate::api::TABLE_ALL;
use crate::api::TableStats;
use crate::api::ValidationError;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KMutexGuard;
use crate::ddi::sync::KRwLock;
use crate::ddi::time::Moment;
use crate::provider::LogLevel;
use crate::provider::Providers;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use std::collections::BTreeMap;
use std::sync::Arc;

bitflags! {
    /// Switch-wide features advertised to the controller.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Capabilities: u32 {
        const FLOW_STATS   = 1 << 0;
        const TABLE_STATS  = 1 << 1;
        const PORT_STATS   = 1 << 2;
        const GROUP_STATS  = 1 << 3;
        const IP_REASM     = 1 << 5;
        const QUEUE_STATS  = 1 << 6;
        const PORT_BLOCKED = 1 << 8;
    }
}

impl Capabilities {
    pub fn for_version(version: OfVersion) -> Self {
        match version {
            OfVersion::V10 => Self::FLOW_STATS | Self::TABLE_STATS,
            OfVersion::V12 | OfVersion::V13 => {
                Self::FLOW_STATS | Self::TABLE_STATS | Self::GROUP_STATS
            }
        }
    }
}

/// Why a packet left the pipeline without being sent anywhere.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropReason {
    /// A table missed and its miss action is to drop, or to continue
    /// past the last table.
    TableMiss { table_id: u8 },
    /// The matched instructions produced no output.
    NoOutput,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TableMiss { table_id } => write!(f, "miss in table {table_id}"),
            Self::NoOutput => write!(f, "no output"),
        }
    }
}

/// What happened to one packet.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessResult {
    /// The tables the packet visited, in order.
    pub tables: Vec<u8>,
    /// The ports the packet was transmitted on, in order.
    pub outputs: Vec<u32>,
    /// The reasons the packet was handed to the controller, in order.
    pub packet_ins: Vec<PacketInReason>,
    pub drop: Option<DropReason>,
}

impl ProcessResult {
    pub fn is_drop(&self) -> bool {
        self.drop.is_some()
    }
}

/// A filter over flow entries for stats requests and deletes.
#[derive(Clone, Debug)]
pub struct FlowFilter {
    /// A table id or [`TABLE_ALL`].
    pub table_id: u8,
    /// Entries are selected when their match set lies within this one.
    pub matches: FlowMatch,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub out_port: u32,
    pub out_group: u32,
}

impl Default for FlowFilter {
    fn default() -> Self {
        Self {
            table_id: TABLE_ALL,
            matches: FlowMatch::new(),
            cookie: 0,
            cookie_mask: 0,
            out_port: PORT_ANY,
            out_group: GROUP_ANY,
        }
    }
}

impl FlowFilter {
    pub fn table(table_id: u8) -> Self {
        Self { table_id, ..Default::default() }
    }

    fn template(&self) -> FlowEntry {
        FlowEntry::new(0, self.matches.clone(), InstructionSet::new())
            .with_cookie(self.cookie, self.cookie_mask)
    }
}

/// Something to hand to the platform once no entry lock is held.
enum Emit {
    Output { port: u32, queue: Option<u32>, pkt: Packet },
    PacketIn { table_id: u8, reason: PacketInReason, send_len: u16, pkt: Packet },
}

/// How the instructions of one table left the packet.
enum Step {
    Goto(u8),
    Done,
    InvalidTtl,
}

/// Per-packet execution state.
struct Exec {
    emits: Vec<Emit>,
    queue: Option<u32>,
    /// Set when a packet-out action list sends the packet to table 0.
    reinject: bool,
    packet_out: bool,
}

impl Exec {
    fn new(packet_out: bool) -> Self {
        Self { emits: Vec::new(), queue: None, reinject: false, packet_out }
    }
}

pub struct Pipeline {
    sw: Arc<SwitchId>,
    version: OfVersion,
    miss_send_len: u16,
    capabilities: Capabilities,
    stat_shards: usize,
    tables: Vec<FlowTable>,
    groups: GroupTable,
    /// Held by a flow-mod from its group check until the entry is in
    /// place, and by a group delete from its reference count until the
    /// group is gone. The packet path never takes it.
    group_refs: KMutex<()>,
    meters: KRwLock<BTreeMap<u32, Arc<ShardedCounter>>>,
    providers: Arc<Providers>,
}

impl Pipeline {
    pub fn new(
        cfg: &PipelineConfig,
        providers: Providers,
    ) -> Result<Self, ConfigError> {
        Self::new_at(cfg, providers, Moment::now())
    }

    /// Build a pipeline whose timers count from `now`.
    pub fn new_at(
        cfg: &PipelineConfig,
        providers: Providers,
        now: Moment,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let sw = Arc::new(SwitchId { dpid: cfg.dpid, name: cfg.name.clone() });
        let providers = Arc::new(providers);
        let stat_shards = match cfg.stat_shards {
            0 => default_shards(),
            n => usize::from(n),
        };

        let tables = (0..cfg.num_tables)
            .map(|id| {
                // num_tables is at most 255 once validated.
                let id = id as u8;
                let tcfg = cfg.table(id);
                let params = TableParams {
                    id,
                    num_tables: cfg.num_tables,
                    version: cfg.version,
                    caps: TableCapabilities::preset(cfg.version).with_config(tcfg),
                    algorithm: tcfg.algorithm,
                    timer: cfg.timer,
                    stat_shards,
                };
                FlowTable::new_at(params, sw.clone(), providers.clone(), now)
            })
            .collect();

        providers.log.log(
            LogLevel::Note,
            &format!(
                "created pipeline {sw}: OpenFlow {} with {} tables",
                cfg.version, cfg.num_tables
            ),
        );

        Ok(Self {
            sw,
            version: cfg.version,
            miss_send_len: cfg.miss_send_len,
            capabilities: Capabilities::for_version(cfg.version),
            stat_shards,
            tables,
            groups: GroupTable::new(cfg.version, stat_shards),
            group_refs: KMutex::new(()),
            meters: KRwLock::new(BTreeMap::new()),
            providers,
        })
    }

    pub fn switch(&self) -> &SwitchId {
        &self.sw
    }

    pub fn version(&self) -> OfVersion {
        self.version
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn miss_send_len(&self) -> u16 {
        self.miss_send_len
    }

    pub fn tables(&self) -> &[FlowTable] {
        &self.tables
    }

    pub fn table(&self, table_id: u8) -> Option<&FlowTable> {
        self.tables.get(usize::from(table_id))
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    fn table_or_err(&self, table_id: u8) -> Result<&FlowTable, FlowModError> {
        self.table(table_id).ok_or(FlowModError::BadTable { table_id })
    }

    /// The tables addressed by `table_id`, which may be [`TABLE_ALL`].
    fn select_tables(&self, table_id: u8) -> Result<&[FlowTable], FlowModError> {
        if table_id == TABLE_ALL {
            return Ok(&self.tables);
        }

        let idx = usize::from(table_id);
        self.tables
            .get(idx..=idx)
            .ok_or(FlowModError::BadTable { table_id })
    }

    /// Check that every group `insts` references exists. The returned
    /// guard keeps those groups from being deleted until it is dropped.
    fn check_groups(
        &self,
        insts: &InstructionSet,
    ) -> Result<Option<KMutexGuard<'_, ()>>, FlowModError> {
        if insts.groups().next().is_none() {
            return Ok(None);
        }

        let guard = self.group_refs.lock();
        for id in insts.groups() {
            if !self.groups.contains(id) {
                return Err(ValidationError::UnknownGroup(id).into());
            }
        }
        Ok(Some(guard))
    }

    pub fn add_flow_entry(
        &self,
        table_id: u8,
        entry: FlowEntry,
        check_overlap: bool,
        reset_counts: bool,
    ) -> Result<EntryHandle, FlowModError> {
        self.add_flow_entry_at(
            table_id,
            entry,
            check_overlap,
            reset_counts,
            Moment::now(),
        )
    }

    /// Install `entry` in table `table_id`. The table takes ownership
    /// of the entry; the returned handle identifies it from then on.
    pub fn add_flow_entry_at(
        &self,
        table_id: u8,
        entry: FlowEntry,
        check_overlap: bool,
        reset_counts: bool,
        now: Moment,
    ) -> Result<EntryHandle, FlowModError> {
        let table = self.table_or_err(table_id)?;
        let _refs = self.check_groups(&entry.instructions)?;
        table.add_at(entry, check_overlap, reset_counts, now)
    }

    pub fn modify_flow_entry(
        &self,
        table_id: u8,
        tmpl: FlowEntry,
        strict: bool,
        reset_counts: bool,
    ) -> Result<(), FlowModError> {
        self.modify_flow_entry_at(
            table_id,
            tmpl,
            strict,
            reset_counts,
            Moment::now(),
        )
    }

    /// Replace the instructions of the entries of table `table_id`
    /// selected by `tmpl`, installing `tmpl` if none is.
    pub fn modify_flow_entry_at(
        &self,
        table_id: u8,
        tmpl: FlowEntry,
        strict: bool,
        reset_counts: bool,
        now: Moment,
    ) -> Result<(), FlowModError> {
        let table = self.table_or_err(table_id)?;
        let _refs = self.check_groups(&tmpl.instructions)?;
        table.modify_at(tmpl, strict, reset_counts, now)
    }

    /// Remove the entries selected by `tmpl` from table `table_id`, or
    /// from every table for [`TABLE_ALL`]. Returns how many were
    /// removed.
    pub fn remove_flow_entry(
        &self,
        table_id: u8,
        tmpl: &FlowEntry,
        strict: bool,
        out_port: u32,
        out_group: u32,
    ) -> Result<usize, FlowModError> {
        let removed = self
            .select_tables(table_id)?
            .iter()
            .map(|t| {
                t.remove(
                    tmpl.clone(),
                    strict,
                    out_port,
                    out_group,
                    RemovalReason::Delete,
                )
            })
            .sum();
        Ok(removed)
    }

    /// Remove exactly the entry `handle` of table `table_id`.
    pub fn remove_specific(
        &self,
        table_id: u8,
        handle: EntryHandle,
    ) -> Result<bool, FlowModError> {
        let table = self.table_or_err(table_id)?;
        Ok(table.remove_specific(handle, RemovalReason::Delete))
    }

    pub fn get_flow_stats(
        &self,
        filter: &FlowFilter,
    ) -> Result<Vec<FlowStatsEntry>, FlowModError> {
        self.get_flow_stats_at(filter, Moment::now())
    }

    pub fn get_flow_stats_at(
        &self,
        filter: &FlowFilter,
        now: Moment,
    ) -> Result<Vec<FlowStatsEntry>, FlowModError> {
        let tmpl = filter.template();
        let stats = self
            .select_tables(filter.table_id)?
            .iter()
            .flat_map(|t| {
                t.flow_stats_at(&tmpl, filter.out_port, filter.out_group, now)
            })
            .collect();
        Ok(stats)
    }

    pub fn get_flow_aggregate_stats(
        &self,
        filter: &FlowFilter,
    ) -> Result<AggregateStats, FlowModError> {
        let tmpl = filter.template();
        let mut total = AggregateStats::default();
        for t in self.select_tables(filter.table_id)? {
            let s = t.aggregate_stats(&tmpl, filter.out_port, filter.out_group);
            total.packet_count += s.packet_count;
            total.byte_count += s.byte_count;
            total.flow_count += s.flow_count;
        }
        Ok(total)
    }

    pub fn get_table_stats(&self) -> Vec<TableStats> {
        self.tables.iter().map(FlowTable::table_stats).collect()
    }

    /// Statistics of group `group_id`, or of every group for
    /// [`GROUP_ALL`].
    pub fn get_group_stats(&self, group_id: u32) -> Vec<GroupStatsEntry> {
        self.groups.stats(group_id, |id| {
            u32::try_from(self.group_ref_count(id)).unwrap_or(u32::MAX)
        })
    }

    pub fn get_meter_stats(&self) -> Vec<MeterStats> {
        self.meters
            .read()
            .iter()
            .map(|(id, c)| {
                let c = c.read();
                MeterStats {
                    meter_id: *id,
                    packet_count: c.packets,
                    byte_count: c.bytes,
                }
            })
            .collect()
    }

    /// The number of flow entries, across all tables, referencing
    /// group `group_id`.
    pub fn group_ref_count(&self, group_id: u32) -> usize {
        self.tables
            .iter()
            .map(|t| t.find_entries_referencing_group(group_id).len())
            .sum()
    }

    pub fn group_add(&self, desc: GroupDesc) -> Result<(), GroupModError> {
        let id = desc.group_id;
        self.groups.add(desc)?;
        self.providers.log.log(LogLevel::Note, &format!("added group {id}"));
        Ok(())
    }

    pub fn group_modify(&self, desc: GroupDesc) -> Result<(), GroupModError> {
        self.groups.modify(desc)
    }

    /// Delete group `group_id`, or every group for [`GROUP_ALL`].
    ///
    /// Flow entries are never removed along with a group: deleting a
    /// group some entry still references fails, leaving every group in
    /// place. Purge the referencing entries first with
    /// [`Pipeline::purge_group_references`].
    pub fn group_delete(&self, group_id: u32) -> Result<Vec<u32>, GroupModError> {
        let _refs = self.group_refs.lock();
        let targets: Vec<u32> = if group_id == GROUP_ALL {
            self.groups.groups().iter().map(|g| g.id()).collect()
        } else {
            vec![group_id]
        };

        for id in targets {
            let flows = self.group_ref_count(id);
            if flows > 0 {
                return Err(GroupModError::StillReferenced { group_id: id, flows });
            }
        }

        Ok(self.groups.delete(group_id))
    }

    /// Remove every flow entry referencing group `group_id`, or any
    /// group for [`GROUP_ALL`]. Returns how many were removed.
    pub fn purge_group_references(&self, group_id: u32) -> usize {
        let ids: Vec<u32> = if group_id == GROUP_ALL {
            self.groups.groups().iter().map(|g| g.id()).collect()
        } else {
            vec![group_id]
        };

        let mut removed = 0;
        for id in ids {
            for t in &self.tables {
                removed += t.purge_group_references(id);
            }
        }

        self.providers.log.log(
            LogLevel::Note,
            &format!("purged {removed} entries referencing group {group_id:#x}"),
        );
        removed
    }

    /// Run the timers of every table. Returns the number of entries
    /// removed.
    pub fn expire_flows(&self) -> usize {
        self.expire_flows_at(Moment::now())
    }

    pub fn expire_flows_at(&self, now: Moment) -> usize {
        self.tables.iter().map(|t| t.expire_at(now)).sum()
    }

    fn meter(&self, id: u32) -> Arc<ShardedCounter> {
        if let Some(m) = self.meters.read().get(&id) {
            return m.clone();
        }

        self.meters
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(ShardedCounter::new(self.stat_shards)))
            .clone()
    }

    fn port_live(&self, port: u32) -> bool {
        self.providers.hooks.is_port_live(port)
    }

    /// Send a snapshot of `pkt` to `port`.
    fn output(
        &self,
        ex: &mut Exec,
        table_id: u8,
        pkt: &Packet,
        port: u32,
        max_len: u16,
    ) {
        let snapshot = Packet { action_set: Default::default(), ..pkt.clone() };

        match port {
            PORT_CONTROLLER => ex.emits.push(Emit::PacketIn {
                table_id,
                reason: PacketInReason::ExplicitAction,
                send_len: max_len,
                pkt: snapshot,
            }),

            PORT_TABLE if ex.packet_out => ex.reinject = true,

            // Never installed outside of packet-out.
            PORT_TABLE => {}

            PORT_IN_PORT => ex.emits.push(Emit::Output {
                port: pkt.matches.in_port,
                queue: ex.queue,
                pkt: snapshot,
            }),

            _ => ex.emits.push(Emit::Output { port, queue: ex.queue, pkt: snapshot }),
        }
    }

    /// Run `actions` against `pkt`. Returns false if a TTL expired,
    /// which ends processing of the packet.
    fn run_actions<'a>(
        &self,
        ex: &mut Exec,
        table_id: u8,
        pkt: &mut Packet,
        actions: impl Iterator<Item = &'a Action>,
    ) -> bool {
        for a in actions {
            if let Action::SetQueue(q) = a {
                ex.queue = Some(*q);
            }

            match a.apply(&mut pkt.matches) {
                ActionEffect::None => {}

                ActionEffect::Output { port, max_len } => {
                    self.output(ex, table_id, pkt, port, max_len)
                }

                ActionEffect::Group(id) => self.run_group(ex, table_id, pkt, id),

                ActionEffect::InvalidTtl => return false,
            }
        }

        true
    }

    /// Send `pkt` through group `id`. Each selected bucket works on its
    /// own copy of the packet.
    fn run_group(&self, ex: &mut Exec, table_id: u8, pkt: &Packet, id: u32) {
        let live = |port: u32| self.port_live(port);
        let Some(buckets) =
            self.groups.select(id, &pkt.matches, u64::from(pkt.len), &live)
        else {
            return;
        };

        let queue = ex.queue;
        for actions in buckets {
            let mut copy = pkt.clone();
            if !self.run_actions(ex, table_id, &mut copy, actions.iter()) {
                ex.emits.push(Emit::PacketIn {
                    table_id,
                    reason: PacketInReason::InvalidTtl,
                    send_len: self.miss_send_len,
                    pkt: copy,
                });
            }
            ex.queue = queue;
        }
    }

    /// Run the instruction ladder of a matched entry.
    fn run_instructions(
        &self,
        ex: &mut Exec,
        table_id: u8,
        insts: &InstructionSet,
        pkt: &mut Packet,
    ) -> Step {
        let mut goto = None;

        for inst in insts.iter() {
            match inst {
                Instruction::ApplyActions(list) => {
                    if !self.run_actions(ex, table_id, pkt, list.iter()) {
                        return Step::InvalidTtl;
                    }
                }

                Instruction::ClearActions => pkt.action_set.clear(),

                Instruction::WriteActions(list) => pkt.action_set.write(list),

                Instruction::WriteMetadata { value, mask } => {
                    let md = pkt.matches.metadata;
                    pkt.matches.metadata = (md & !mask) | (value & mask);
                }

                Instruction::GotoTable(next) => goto = Some(*next),

                Instruction::Meter(id) => self.meter(*id).hit(u64::from(pkt.len)),

                Instruction::Experimenter(_) => {}
            }
        }

        match goto {
            Some(next) => Step::Goto(next),
            None => Step::Done,
        }
    }

    /// Execute the action set accumulated by `pkt`.
    fn run_action_set(&self, ex: &mut Exec, table_id: u8, pkt: &mut Packet) -> bool {
        let set: Vec<Action> = pkt.action_set.iter().copied().collect();
        pkt.action_set.clear();
        self.run_actions(ex, table_id, pkt, set.iter())
    }

    fn to_controller(
        &self,
        ex: &mut Exec,
        table_id: u8,
        reason: PacketInReason,
        pkt: &Packet,
    ) {
        ex.emits.push(Emit::PacketIn {
            table_id,
            reason,
            send_len: self.miss_send_len,
            pkt: pkt.clone(),
        });
    }

    /// Walk `pkt` through the tables starting at table 0. Returns the
    /// drop reason, if the walk itself decided to drop.
    fn walk(
        &self,
        ex: &mut Exec,
        res: &mut ProcessResult,
        pkt: &mut Packet,
    ) -> Option<DropReason> {
        let mut table_id = 0;

        loop {
            let table = &self.tables[usize::from(table_id)];
            res.tables.push(table_id);

            let step = table.lookup(pkt, |_entry, insts, pkt| {
                self.run_instructions(ex, table_id, insts, pkt)
            });

            match step {
                Some(Step::Goto(next)) => {
                    table_id = next;
                }

                Some(Step::Done) => {
                    if !self.run_action_set(ex, table_id, pkt) {
                        self.to_controller(ex, table_id, PacketInReason::InvalidTtl, pkt);
                    }
                    return None;
                }

                Some(Step::InvalidTtl) => {
                    self.to_controller(ex, table_id, PacketInReason::InvalidTtl, pkt);
                    return None;
                }

                None => match table.miss_action() {
                    MissAction::Drop => {
                        return Some(DropReason::TableMiss { table_id });
                    }

                    MissAction::ToController => {
                        self.to_controller(ex, table_id, PacketInReason::NoMatch, pkt);
                        return None;
                    }

                    MissAction::Continue => {
                        if usize::from(table_id) + 1 >= self.tables.len() {
                            return Some(DropReason::TableMiss { table_id });
                        }
                        table_id += 1;
                    }
                },
            }
        }
    }

    /// Hand the collected outputs and packet-ins to the platform.
    fn emit(&self, ex: Exec, res: &mut ProcessResult) {
        let hooks = &self.providers.hooks;

        for e in ex.emits {
            match e {
                Emit::Output { port, queue, pkt } => {
                    hooks.packet_out(&self.sw, &pkt, port, queue);
                    res.outputs.push(port);
                }

                Emit::PacketIn { table_id, reason, send_len, pkt } => {
                    res.packet_ins.push(reason);
                    hooks.packet_in(&self.sw, table_id, pkt, send_len, reason);
                }
            }
        }
    }

    fn finish(&self, res: &mut ProcessResult, drop: Option<DropReason>, pkt: &Packet) {
        if drop.is_some() {
            res.drop = drop;
        } else if res.outputs.is_empty() && res.packet_ins.is_empty() {
            res.drop = Some(DropReason::NoOutput);
        }

        if res.drop.is_some() {
            self.providers.hooks.packet_drop(&self.sw, pkt);
        }
    }

    /// Process a packet received by the switch.
    pub fn process_packet(&self, mut pkt: Packet) -> ProcessResult {
        let mut res = ProcessResult::default();
        let mut ex = Exec::new(false);
        pkt.action_set.clear();

        let drop = self.walk(&mut ex, &mut res, &mut pkt);
        self.emit(ex, &mut res);
        self.finish(&mut res, drop, &pkt);
        res
    }

    /// Execute `actions` on a packet sent by the controller. An output
    /// to [`PORT_TABLE`] submits the packet, as modified by the actions
    /// before it, to table 0 once the list has run.
    pub fn process_packet_out(
        &self,
        mut pkt: Packet,
        actions: &ActionList,
    ) -> Result<ProcessResult, ValidationError> {
        for a in actions.iter() {
            let kind = a.kind();
            if !kind.supported_by(self.version) {
                return Err(ValidationError::VersionMismatch {
                    what: kind.name(),
                    version: self.version,
                });
            }

            match a {
                Action::Output { port, .. } if !is_valid_output_port(*port) => {
                    return Err(ValidationError::InvalidOutputPort(*port));
                }
                Action::Group(id) if !self.groups.contains(*id) => {
                    return Err(ValidationError::UnknownGroup(*id));
                }
                _ => {}
            }
        }

        let mut res = ProcessResult::default();
        let mut ex = Exec::new(true);
        pkt.action_set.clear();

        let mut drop = None;
        if !self.run_actions(&mut ex, TABLE_ALL, &mut pkt, actions.iter()) {
            self.to_controller(&mut ex, TABLE_ALL, PacketInReason::InvalidTtl, &pkt);
        } else if ex.reinject {
            ex.packet_out = false;
            drop = self.walk(&mut ex, &mut res, &mut pkt);
        }

        self.emit(ex, &mut res);
        self.finish(&mut res, drop, &pkt);
        Ok(res)
    }
}
