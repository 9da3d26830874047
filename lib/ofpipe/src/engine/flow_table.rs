// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A flow table: an ordered set of entries, one lookup strategy, the
//! capabilities that bound what may be installed, and a timer wheel.
//!
//! Locking follows a fixed order. The writer mutex serializes every
//! structural change (flow-mods and the timer sweep). The entry set
//! lock is taken for reading by packet lookups and for writing only
//! around the splice of an entry into or out of the set. Finally each
//! entry has its own lock, held for reading while its instructions
//! run; a writer takes it before an entry is considered gone.

use super::action::ActionKind;
use super::action::ActionKindSet;
use super::action::ActionList;
use super::action::is_valid_output_port;
use super::action::Action;
use super::arena::EntryHandle;
use super::flow_entry::FlowEntry;
use super::flow_entry::TableEntry;
use super::flow_entry::check_contained;
use super::flow_entry::check_equal;
use super::flow_entry::check_overlap;
use super::instruction::Instruction;
use super::instruction::InstructionKinds;
use super::instruction::InstructionSet;
use super::matching::EntryList;
use super::matching::MatchingAlgorithm;
use super::matching::new_algorithm;
use super::packet::Packet;
use super::packet::PacketMatches;
use super::predicate::FieldSet;
use super::stat::FlowStats;
use super::stat::TableStats as TableCounters;
use super::timer::TimerKind;
use super::timer::TimerWheel;
use crate::api::AggregateStats;
use crate::api::FlowModError;
use crate::api::FlowStatsEntry;
use crate::api::GROUP_ANY;
use crate::api::MatchField;
use crate::api::MatchingAlgorithmKind;
use crate::api::MissAction;
use crate::api::OF10_NON_WILDCARDED_PRIORITY_FLAG;
use crate::api::OfVersion;
use crate::api::PORT_ANY;
use crate::api::PORT_TABLE;
use crate::api::RemovalReason;
use crate::api::SwitchId;
use crate::api::TableConfig;
use crate::api::TableStats;
use crate::api::TimerConfig;
use crate::api::ValidationError;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KMutexGuard;
use crate::ddi::sync::KRwLock;
use crate::ddi::time::Moment;
use crate::provider::LogLevel;
use crate::provider::Providers;
use std::sync::Arc;

/// Default maximum number of entries per table.
pub const DEFAULT_MAX_ENTRIES: u32 = 0xffff_ffff;

/// What a table accepts, and how it behaves on a miss.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableCapabilities {
    pub match_fields: FieldSet,
    /// Fields that may carry a partial mask.
    pub wildcards: FieldSet,
    pub instructions: InstructionKinds,
    pub apply_actions: ActionKindSet,
    pub write_actions: ActionKindSet,
    pub metadata_match: u64,
    pub metadata_write: u64,
    pub miss: MissAction,
    pub max_entries: u32,
}

impl TableCapabilities {
    /// The default capabilities of a table for the given version.
    pub fn preset(version: OfVersion) -> Self {
        use MatchField::*;

        let match_fields: FieldSet = MatchField::ALL
            .into_iter()
            .filter(|f| f.supported_by(version))
            .collect();
        let actions: ActionKindSet =
            ActionKind::all().filter(|k| k.supported_by(version)).collect();

        match version {
            OfVersion::V10 => Self {
                match_fields,
                wildcards: [EthDst, EthSrc, NwSrc, NwDst].into_iter().collect(),
                instructions: InstructionKinds::APPLY_ACTIONS,
                apply_actions: actions,
                write_actions: ActionKindSet::EMPTY,
                metadata_match: 0,
                metadata_write: 0,
                miss: MissAction::ToController,
                max_entries: DEFAULT_MAX_ENTRIES,
            },

            OfVersion::V12 | OfVersion::V13 => {
                let mut wildcards: FieldSet = [
                    Metadata, EthDst, EthSrc, VlanVid, ArpSha, ArpSpa, ArpTha,
                    ArpTpa, Ipv4Src, Ipv4Dst, Ipv6Src, Ipv6Dst, Ipv6Flabel,
                ]
                .into_iter()
                .collect();
                let mut instructions = InstructionKinds::APPLY_ACTIONS
                    | InstructionKinds::CLEAR_ACTIONS
                    | InstructionKinds::WRITE_ACTIONS
                    | InstructionKinds::WRITE_METADATA
                    | InstructionKinds::GOTO_TABLE;
                let mut miss = MissAction::ToController;

                if version == OfVersion::V13 {
                    for f in [Ipv6Exthdr, PbbIsid, TunnelId] {
                        wildcards.insert(f);
                    }
                    instructions |= InstructionKinds::METER;
                    miss = MissAction::Continue;
                }

                Self {
                    match_fields,
                    wildcards,
                    instructions,
                    apply_actions: actions,
                    write_actions: actions,
                    metadata_match: u64::MAX,
                    metadata_write: u64::MAX,
                    miss,
                    max_entries: DEFAULT_MAX_ENTRIES,
                }
            }
        }
    }

    /// Apply the overrides of a table configuration.
    pub fn with_config(mut self, cfg: &TableConfig) -> Self {
        if let Some(max) = cfg.max_entries {
            self.max_entries = max;
        }
        if let Some(miss) = cfg.miss {
            self.miss = miss;
        }
        self
    }
}

/// Everything needed to build one table.
pub struct TableParams {
    pub id: u8,
    pub num_tables: u16,
    pub version: OfVersion,
    pub caps: TableCapabilities,
    pub algorithm: MatchingAlgorithmKind,
    pub timer: TimerConfig,
    pub stat_shards: usize,
}

#[derive(Debug)]
struct EntrySet {
    list: EntryList,
    algo: Box<dyn MatchingAlgorithm>,
}

/// State owned by whoever holds the writer mutex.
#[derive(Debug)]
struct Writer {
    timers: TimerWheel,
    next_seq: u64,
}

pub struct FlowTable {
    id: u8,
    name: String,
    num_tables: u16,
    version: OfVersion,
    caps: TableCapabilities,
    max_timeout_secs: u64,
    stat_shards: usize,
    writer: KMutex<Writer>,
    entries: KRwLock<EntrySet>,
    counters: TableCounters,
    sw: Arc<SwitchId>,
    providers: Arc<Providers>,
}

impl FlowTable {
    pub fn new(
        params: TableParams,
        sw: Arc<SwitchId>,
        providers: Arc<Providers>,
    ) -> Self {
        Self::new_at(params, sw, providers, Moment::now())
    }

    pub fn new_at(
        params: TableParams,
        sw: Arc<SwitchId>,
        providers: Arc<Providers>,
        now: Moment,
    ) -> Self {
        let writer = Writer {
            timers: TimerWheel::new(&params.timer, now),
            next_seq: 0,
        };
        let entries = EntrySet {
            list: EntryList::new(),
            algo: new_algorithm(params.algorithm),
        };

        Self {
            id: params.id,
            name: format!("table{}", params.id),
            num_tables: params.num_tables,
            version: params.version,
            caps: params.caps,
            max_timeout_secs: params.timer.max_timeout_secs(),
            stat_shards: params.stat_shards,
            writer: KMutex::new(writer),
            entries: KRwLock::new(entries),
            counters: TableCounters::new(params.stat_shards),
            sw,
            providers,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &TableCapabilities {
        &self.caps
    }

    pub fn miss_action(&self) -> MissAction {
        self.caps.miss
    }

    pub fn algorithm(&self) -> MatchingAlgorithmKind {
        self.entries.read().algo.kind()
    }

    pub fn len(&self) -> usize {
        self.entries.read().list.len()
    }

    fn log(&self, level: LogLevel, msg: &str) {
        self.providers.log.log(level, &format!("{}: {msg}", self.name));
    }

    fn check_actions(
        &self,
        list: &ActionList,
        allowed: ActionKindSet,
        list_name: &'static str,
    ) -> Result<(), ValidationError> {
        for a in list.iter() {
            let kind = a.kind();
            if !kind.supported_by(self.version) {
                return Err(ValidationError::VersionMismatch {
                    what: kind.name(),
                    version: self.version,
                });
            }

            if !allowed.contains(kind) {
                return Err(ValidationError::UnsupportedAction {
                    action: kind.name(),
                    list: list_name,
                });
            }

            if let Action::Output { port, .. } = a {
                if *port == PORT_TABLE || !is_valid_output_port(*port) {
                    return Err(ValidationError::InvalidOutputPort(*port));
                }
            }

            if let Action::SetField(m) = a {
                if !m.field().supported_by(self.version) {
                    return Err(ValidationError::FieldVersion {
                        field: m.field(),
                        version: self.version,
                    });
                }
            }
        }

        Ok(())
    }

    /// Check `entry` against the capabilities of this table. Group
    /// references are checked by the pipeline, which owns the groups.
    pub fn validate(&self, entry: &FlowEntry) -> Result<(), ValidationError> {
        let table_id = self.id;

        if let Some(field) = entry.matches.duplicate_field() {
            return Err(ValidationError::DuplicateField { field });
        }

        for m in entry.matches.iter() {
            let field = m.field();
            if !field.supported_by(self.version) {
                return Err(ValidationError::FieldVersion {
                    field,
                    version: self.version,
                });
            }

            if !self.caps.match_fields.contains(field) {
                return Err(ValidationError::UnsupportedField { table_id, field });
            }

            if !m.is_exact() && !self.caps.wildcards.contains(field) {
                return Err(ValidationError::NotWildcardable { table_id, field });
            }

            if field == MatchField::Metadata {
                let mask = m.mask() as u64;
                if mask & !self.caps.metadata_match != 0 {
                    return Err(ValidationError::MetadataMask {
                        mask,
                        allowed: self.caps.metadata_match,
                    });
                }
            }
        }

        for inst in entry.instructions.iter() {
            if !self.caps.instructions.contains(inst.kind()) {
                return Err(ValidationError::UnsupportedInstruction(inst.name()));
            }

            match inst {
                Instruction::ApplyActions(l) => {
                    self.check_actions(l, self.caps.apply_actions, "apply")?
                }

                Instruction::WriteActions(l) => {
                    self.check_actions(l, self.caps.write_actions, "write")?
                }

                Instruction::WriteMetadata { mask, .. } => {
                    if mask & !self.caps.metadata_write != 0 {
                        return Err(ValidationError::MetadataMask {
                            mask: *mask,
                            allowed: self.caps.metadata_write,
                        });
                    }
                }

                Instruction::GotoTable(to) => {
                    if *to <= self.id || u16::from(*to) >= self.num_tables {
                        return Err(ValidationError::BadGotoTable {
                            from: self.id,
                            to: *to,
                        });
                    }
                }

                Instruction::ClearActions
                | Instruction::Meter(_)
                | Instruction::Experimenter(_) => {}
            }
        }

        for timeout in [entry.idle_timeout, entry.hard_timeout] {
            if u64::from(timeout) > self.max_timeout_secs {
                return Err(ValidationError::TimeoutTooLarge {
                    timeout,
                    max_secs: self.max_timeout_secs,
                });
            }
        }

        Ok(())
    }

    /// OpenFlow 1.0 ranks fully specified entries above every entry
    /// with a wildcard.
    fn normalize_priority(&self, entry: &mut FlowEntry) {
        if self.version == OfVersion::V10
            && !entry.matches.is_empty()
            && !entry.matches.has_wildcard()
        {
            entry.priority |= OF10_NON_WILDCARDED_PRIORITY_FLAG;
        }
    }

    /// OpenFlow 1.0 has no cookie filtering on modify and delete.
    fn check_cookie(&self) -> bool {
        self.version != OfVersion::V10
    }

    /// Install `entry`. See [`FlowTable::add_at`].
    pub fn add(
        &self,
        entry: FlowEntry,
        check_overlap: bool,
        reset_counts: bool,
    ) -> Result<EntryHandle, FlowModError> {
        self.add_at(entry, check_overlap, reset_counts, Moment::now())
    }

    /// Install `entry`, taking ownership of it.
    ///
    /// An installed entry with an identical match set and priority is
    /// replaced, and no removal notification is sent for it. Its
    /// counters carry over to the new entry unless `reset_counts` is
    /// set or the table speaks OpenFlow 1.0.
    /// A full table rejects the entry unless it replaces one.
    pub fn add_at(
        &self,
        mut entry: FlowEntry,
        check_overlap: bool,
        reset_counts: bool,
        now: Moment,
    ) -> Result<EntryHandle, FlowModError> {
        if let Err(e) = self.validate(&entry) {
            self.log(LogLevel::Warn, &format!("rejected {entry}: {e}"));
            return Err(e.into());
        }
        self.normalize_priority(&mut entry);

        let mut w = self.writer.lock();
        self.add_locked(&mut w, entry, check_overlap, reset_counts, now)
    }

    fn add_locked(
        &self,
        w: &mut KMutexGuard<'_, Writer>,
        entry: FlowEntry,
        check_overlap_req: bool,
        reset_counts: bool,
        now: Moment,
    ) -> Result<EntryHandle, FlowModError> {
        let old = {
            let set = self.entries.read();

            if check_overlap_req {
                if let Some(e) =
                    set.list.iter().find(|e| check_overlap(&***e, &entry, true))
                {
                    return Err(FlowModError::Overlap {
                        table_id: self.id,
                        priority: e.priority(),
                    });
                }
            }

            let old = set
                .list
                .iter()
                .find(|e| check_equal(&***e, &entry, PORT_ANY, GROUP_ANY, false))
                .cloned();

            if old.is_none() && set.list.len() >= self.caps.max_entries as usize
            {
                return Err(FlowModError::Capacity {
                    table_id: self.id,
                    max_entries: self.caps.max_entries,
                });
            }

            old
        };

        // OpenFlow 1.0 replacements always start from zero.
        let carry = match &old {
            Some(o) if !reset_counts && self.version != OfVersion::V10 => {
                Some(o.clone())
            }
            _ => None,
        };
        let created_at = carry.as_ref().map_or(now, |o| o.stats().created_at);
        let stats = FlowStats::new(self.stat_shards, created_at);

        let seq = w.next_seq;
        w.next_seq += 1;
        let idle = entry.idle_timeout;
        let hard = entry.hard_timeout;

        let new = {
            let mut set = self.entries.write();
            let handle = set.list.next_handle();
            let new = Arc::new(TableEntry::new(entry, handle, self.id, seq, stats));
            set.list.insert(new.clone());
            set.algo.add(&new);

            if let Some(o) = &old {
                set.list.remove(o.handle());
                set.algo.remove(o);
            }
            new
        };

        if let Some(o) = old {
            self.log(LogLevel::Note, &format!("replaced {o}"));
            self.retire(w, &o, None);
        }

        // The old entry takes no more hits once retired. Fold its
        // counters in on top of whatever the new entry has seen.
        if let Some(o) = carry {
            new.carry_stats(&o);
        }

        self.providers.hooks.flow_add(&new);

        let handle = new.handle();
        if idle > 0 {
            w.timers.arm(handle, TimerKind::Idle, idle, now);
        }
        if hard > 0 {
            w.timers.arm(handle, TimerKind::Hard, hard, now);
        }

        Ok(handle)
    }

    /// Finish off an entry already spliced out of the set: drop its
    /// timers, wait out packet-path readers, and tell the platform.
    /// `reason` is `None` for a replacement, which is never notified.
    fn retire(
        &self,
        w: &mut KMutexGuard<'_, Writer>,
        entry: &TableEntry,
        reason: Option<RemovalReason>,
    ) {
        w.timers.cancel(entry.handle());
        drop(entry.instructions_mut());

        let hooks = &self.providers.hooks;
        hooks.flow_remove(entry);
        if let Some(reason) = reason {
            if entry.notify_on_removal() {
                hooks.flow_removed(&self.sw, reason, entry);
            }
        }
    }

    fn splice_out(&self, entries: &[Arc<TableEntry>]) {
        let mut set = self.entries.write();
        for e in entries {
            if set.list.remove(e.handle()).is_some() {
                set.algo.remove(e);
            }
        }
    }

    /// Update the instructions of the entries `tmpl` selects. See
    /// [`FlowTable::modify_at`].
    pub fn modify(
        &self,
        tmpl: FlowEntry,
        strict: bool,
        reset_counts: bool,
    ) -> Result<(), FlowModError> {
        self.modify_at(tmpl, strict, reset_counts, Moment::now())
    }

    /// Replace the instructions of every entry `tmpl` selects: with
    /// `strict`, the first entry equal to it; otherwise every entry it
    /// contains. Match sets and priorities are left alone.
    ///
    /// When nothing is selected the template is installed as a new
    /// entry instead.
    pub fn modify_at(
        &self,
        mut tmpl: FlowEntry,
        strict: bool,
        reset_counts: bool,
        now: Moment,
    ) -> Result<(), FlowModError> {
        if let Err(e) = self.validate(&tmpl) {
            self.log(LogLevel::Warn, &format!("rejected modify {tmpl}: {e}"));
            return Err(e.into());
        }
        self.normalize_priority(&mut tmpl);

        let mut w = self.writer.lock();
        let check_cookie = self.check_cookie();
        let targets: Vec<Arc<TableEntry>> = {
            let set = self.entries.read();
            if strict {
                set.list
                    .iter()
                    .find(|e| {
                        check_equal(&***e, &tmpl, PORT_ANY, GROUP_ANY, check_cookie)
                    })
                    .cloned()
                    .into_iter()
                    .collect()
            } else {
                set.list
                    .iter()
                    .filter(|e| {
                        check_contained(
                            &***e,
                            &tmpl,
                            false,
                            PORT_ANY,
                            GROUP_ANY,
                            check_cookie,
                        )
                    })
                    .cloned()
                    .collect()
            }
        };

        if targets.is_empty() {
            return self
                .add_locked(&mut w, tmpl, false, reset_counts, now)
                .map(|_| ());
        }

        for e in targets {
            let old = {
                let mut insts = e.instructions_mut();
                core::mem::replace(&mut *insts, tmpl.instructions.clone())
            };
            if reset_counts {
                e.reset_stats();
            }
            self.providers.hooks.flow_modify(&e, &old);
        }

        Ok(())
    }

    /// Remove the entries `tmpl` selects, filtered by the out-port and
    /// out-group of their actions: with `strict`, the first entry
    /// equal to the template; otherwise every entry it contains.
    ///
    /// Returns the number of entries removed. Selecting nothing is not
    /// an error.
    pub fn remove(
        &self,
        mut tmpl: FlowEntry,
        strict: bool,
        out_port: u32,
        out_group: u32,
        reason: RemovalReason,
    ) -> usize {
        if strict {
            self.normalize_priority(&mut tmpl);
        }

        let mut w = self.writer.lock();
        let check_cookie = self.check_cookie();
        let targets: Vec<Arc<TableEntry>> = {
            let set = self.entries.read();
            if strict {
                set.list
                    .iter()
                    .find(|e| {
                        check_equal(&***e, &tmpl, out_port, out_group, check_cookie)
                    })
                    .cloned()
                    .into_iter()
                    .collect()
            } else {
                set.list
                    .iter()
                    .filter(|e| {
                        check_contained(
                            &***e,
                            &tmpl,
                            false,
                            out_port,
                            out_group,
                            check_cookie,
                        )
                    })
                    .cloned()
                    .collect()
            }
        };

        self.splice_out(&targets);
        for e in &targets {
            self.retire(&mut w, e, Some(reason));
        }

        targets.len()
    }

    /// Remove one specific entry. Returns false if it was already
    /// gone.
    pub fn remove_specific(
        &self,
        handle: EntryHandle,
        reason: RemovalReason,
    ) -> bool {
        let mut w = self.writer.lock();
        self.remove_specific_locked(&mut w, handle, reason)
    }

    fn remove_specific_locked(
        &self,
        w: &mut KMutexGuard<'_, Writer>,
        handle: EntryHandle,
        reason: RemovalReason,
    ) -> bool {
        let entry = {
            let mut set = self.entries.write();
            let Some(entry) = set.list.remove(handle) else {
                return false;
            };
            set.algo.remove(&entry);
            entry
        };

        self.retire(w, &entry, Some(reason));
        true
    }

    /// Find the best entry for `pkt` and run `f` against it while
    /// holding the entry's read lock, so the entry cannot be modified
    /// or removed until `f` returns. The entry and the table are
    /// charged the length of the packet.
    pub fn lookup<F, R>(&self, pkt: &mut Packet, f: F) -> Option<R>
    where
        F: FnOnce(&TableEntry, &InstructionSet, &mut Packet) -> R,
    {
        let bytes = u64::from(pkt.len);
        self.counters.lookups.hit(bytes);

        let set = self.entries.read();
        let handle = set.algo.find_best_match(&set.list, &pkt.matches)?;
        let entry = set.list.get(handle)?.clone();
        let insts = entry.instructions();
        drop(set);

        self.counters.matched.hit(bytes);
        entry.hit(bytes);
        Some(f(&entry, &insts, pkt))
    }

    /// The handle of the best entry for `pkt`, without charging any
    /// counter.
    pub fn find_best_match(&self, pkt: &PacketMatches) -> Option<EntryHandle> {
        let set = self.entries.read();
        set.algo.find_best_match(&set.list, pkt)
    }

    pub fn get(&self, handle: EntryHandle) -> Option<Arc<TableEntry>> {
        self.entries.read().list.get(handle).cloned()
    }

    /// Every entry, in lookup order.
    pub fn entries(&self) -> Vec<Arc<TableEntry>> {
        self.entries.read().list.iter().cloned().collect()
    }

    pub fn find_entries_referencing_group(&self, group_id: u32) -> Vec<EntryHandle> {
        let set = self.entries.read();
        set.algo.find_entries_referencing_group(&set.list, group_id)
    }

    /// Remove every entry referencing `group_id`.
    pub fn purge_group_references(&self, group_id: u32) -> usize {
        let mut w = self.writer.lock();
        let handles = self.find_entries_referencing_group(group_id);
        handles
            .into_iter()
            .filter(|h| {
                self.remove_specific_locked(&mut w, *h, RemovalReason::GroupDelete)
            })
            .count()
    }

    fn select(
        &self,
        tmpl: &FlowEntry,
        out_port: u32,
        out_group: u32,
    ) -> Vec<Arc<TableEntry>> {
        let entries: Vec<_> = {
            let set = self.entries.read();
            set.list
                .iter()
                .filter(|e| {
                    check_contained(&***e, tmpl, false, out_port, out_group, true)
                })
                .cloned()
                .collect()
        };

        for e in &entries {
            self.providers.hooks.stats_refresh(e);
        }
        entries
    }

    pub fn flow_stats(
        &self,
        tmpl: &FlowEntry,
        out_port: u32,
        out_group: u32,
    ) -> Vec<FlowStatsEntry> {
        self.flow_stats_at(tmpl, out_port, out_group, Moment::now())
    }

    /// The statistics of every entry contained in `tmpl` whose cookie
    /// agrees with the template's under its cookie mask.
    pub fn flow_stats_at(
        &self,
        tmpl: &FlowEntry,
        out_port: u32,
        out_group: u32,
        now: Moment,
    ) -> Vec<FlowStatsEntry> {
        self.select(tmpl, out_port, out_group)
            .iter()
            .map(|e| e.stats_entry(now))
            .collect()
    }

    pub fn aggregate_stats(
        &self,
        tmpl: &FlowEntry,
        out_port: u32,
        out_group: u32,
    ) -> AggregateStats {
        let mut agg = AggregateStats::default();
        for e in self.select(tmpl, out_port, out_group) {
            let c = e.stats().counter.read();
            agg.packet_count += c.packets;
            agg.byte_count += c.bytes;
            agg.flow_count += 1;
        }
        agg
    }

    pub fn table_stats(&self) -> TableStats {
        TableStats {
            table_id: self.id,
            name: self.name.clone(),
            algorithm: self.algorithm(),
            active_count: u32::try_from(self.len()).unwrap_or(u32::MAX),
            max_entries: self.caps.max_entries,
            lookup_count: self.counters.lookups.packets(),
            matched_count: self.counters.matched.packets(),
        }
    }

    /// Run the timers whose deadline passed at `now`. Hard timeouts
    /// remove their entry; an idle timeout removes its entry only if
    /// no packet matched it since the previous check, and is armed
    /// again otherwise.
    ///
    /// Returns the number of entries removed.
    pub fn expire_at(&self, now: Moment) -> usize {
        let mut w = self.writer.lock();
        let fired = w.timers.advance(now);
        let mut removed = 0;

        for t in fired {
            let Some(entry) = self.get(t.handle) else {
                continue;
            };

            let reason = match t.kind {
                TimerKind::Hard => RemovalReason::HardTimeout,
                TimerKind::Idle if entry.idle_check() => {
                    RemovalReason::IdleTimeout
                }
                TimerKind::Idle => {
                    w.timers.arm(t.handle, TimerKind::Idle, entry.idle_timeout(), now);
                    continue;
                }
            };

            if self.remove_specific_locked(&mut w, t.handle, reason) {
                self.log(LogLevel::Note, &format!("expired ({reason}) {entry}"));
                removed += 1;
            }
        }

        removed
    }

    /// The number of armed timers.
    #[cfg(any(feature = "test-help", test))]
    pub fn num_timers(&self) -> usize {
        self.writer.lock().timers.len()
    }
}
