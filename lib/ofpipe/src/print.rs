// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Tabular dumps of tables, flow stats and groups, shared by ofpadm
//! and the integration tests.

use crate::api::FlowStatsEntry;
use crate::api::GroupStatsEntry;
use crate::api::TableStats;
use crate::engine::flow_table::FlowTable;
use crate::engine::predicate::Match;
use itertools::Itertools;
use std::io::Write;
use tabwriter::TabWriter;

/// Print the entries of a [`FlowTable`].
pub fn print_table(table: &FlowTable) -> std::io::Result<()> {
    print_table_into(&mut std::io::stdout(), table)
}

/// Print the entries of a [`FlowTable`] into a given writer.
pub fn print_table_into(
    writer: &mut impl Write,
    table: &FlowTable,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    let stats = table.table_stats();

    writeln!(
        t,
        "Table {} ({}): {}/{} entries, miss {}",
        stats.name,
        stats.algorithm,
        stats.active_count,
        stats.max_entries,
        table.miss_action(),
    )?;
    write_hr(&mut t)?;
    writeln!(t, "HANDLE\tPRI\tPKTS\tBYTES\tMATCH\tINSTRUCTIONS")?;

    for e in table.entries() {
        let c = e.stats().counter.read();
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}",
            e.handle(),
            e.priority(),
            c.packets,
            c.bytes,
            e.matches(),
            *e.instructions(),
        )?;
    }
    t.flush()
}

/// Print a list of [`FlowStatsEntry`].
pub fn print_flow_stats(stats: &[FlowStatsEntry]) -> std::io::Result<()> {
    print_flow_stats_into(&mut std::io::stdout(), stats)
}

/// Print a list of [`FlowStatsEntry`] into a given writer.
pub fn print_flow_stats_into(
    writer: &mut impl Write,
    stats: &[FlowStatsEntry],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(
        t,
        "TABLE\tPRI\tCOOKIE\tAGE\tIDLE\tHARD\tPKTS\tBYTES\tMATCH\tINSTRUCTIONS"
    )?;

    for s in stats {
        let matches = if s.matches.is_empty() {
            String::from("*")
        } else {
            s.matches
                .iter()
                .map(|d| Match::new(d.field, d.value, d.mask))
                .join(",")
        };

        let insts = if s.instructions.is_empty() {
            String::from("drop")
        } else {
            s.instructions.join(" ")
        };

        writeln!(
            t,
            "{}\t{}\t{:#x}\t{}.{:03}\t{}\t{}\t{}\t{}\t{}\t{}",
            s.table_id,
            s.priority,
            s.cookie,
            s.duration_sec,
            s.duration_nsec / 1_000_000,
            s.idle_timeout,
            s.hard_timeout,
            s.packet_count,
            s.byte_count,
            matches,
            insts,
        )?;
    }
    t.flush()
}

/// Print a list of [`TableStats`].
pub fn print_table_stats(stats: &[TableStats]) -> std::io::Result<()> {
    print_table_stats_into(&mut std::io::stdout(), stats)
}

/// Print a list of [`TableStats`] into a given writer.
pub fn print_table_stats_into(
    writer: &mut impl Write,
    stats: &[TableStats],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "ID\tNAME\tALGO\tACTIVE\tMAX\tLOOKUPS\tMATCHED")?;

    for s in stats {
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            s.table_id,
            s.name,
            s.algorithm,
            s.active_count,
            s.max_entries,
            s.lookup_count,
            s.matched_count,
        )?;
    }
    t.flush()
}

/// Print a list of [`GroupStatsEntry`].
pub fn print_groups(stats: &[GroupStatsEntry]) -> std::io::Result<()> {
    print_groups_into(&mut std::io::stdout(), stats)
}

/// Print a list of [`GroupStatsEntry`] into a given writer.
pub fn print_groups_into(
    writer: &mut impl Write,
    stats: &[GroupStatsEntry],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "GROUP\tTYPE\tREFS\tPKTS\tBYTES\tBUCKET PKTS")?;

    for g in stats {
        let buckets = g
            .buckets
            .iter()
            .map(|b| b.packets)
            .join("/");

        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}",
            g.group_id,
            g.group_type,
            g.ref_count,
            g.packet_count,
            g.byte_count,
            buckets,
        )?;
    }
    t.flush()
}

/// Print a horizontal rule into a given writer.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
