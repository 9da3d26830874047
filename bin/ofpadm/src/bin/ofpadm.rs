// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::ValueEnum;
use slog::Drain;
use slog::Logger;
use slog::o;
use tabwriter::TabWriter;

use ofpadm::Report;
use ofpadm::Scenario;
use ofpipe::api::GROUP_ALL;
use ofpipe::api::PipelineConfig;
use ofpipe::engine::pipeline::FlowFilter;
use ofpipe::print::print_flow_stats;
use ofpipe::print::print_groups;
use ofpipe::print::print_table;
use ofpipe::print::print_table_stats;

/// Replay OpenFlow pipeline scenarios
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Run a scenario and print what happened to each packet.
    Run {
        /// A `.ron` or `.json` scenario file.
        scenario: PathBuf,

        /// Dump the entries of every table once the scenario is over.
        #[arg(long)]
        dump_tables: bool,
    },

    /// Parse and validate a scenario without running it.
    Check { scenario: PathBuf },

    /// Print the default pipeline configuration.
    DefaultConfig {
        #[arg(long, value_enum, default_value_t = Format::Ron)]
        format: Format,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Ron,
    Json,
}

/// Log to stderr, filtered by `RUST_LOG`.
fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

fn print_outcomes(report: &Report) -> std::io::Result<()> {
    let mut t = TabWriter::new(std::io::stdout());
    writeln!(t, "AT\tPACKET\tTABLES\tOUTPUTS\tPACKET-INS\tDROP")?;

    for p in &report.packets {
        let res = &p.result;
        let join = |v: Vec<String>| match v.is_empty() {
            true => String::from("-"),
            false => v.join(","),
        };
        let drop = match &res.drop {
            Some(reason) => reason.to_string(),
            None => String::from("-"),
        };
        writeln!(
            t,
            "{}ms\t{}\t{}\t{}\t{}\t{}",
            p.at_ms,
            p.index,
            join(res.tables.iter().map(|id| id.to_string()).collect()),
            join(res.outputs.iter().map(|port| port.to_string()).collect()),
            join(res.packet_ins.iter().map(|r| r.to_string()).collect()),
            drop,
        )?;
    }

    t.flush()
}

fn load(path: &Path) -> anyhow::Result<Scenario> {
    Scenario::load(path)
        .with_context(|| format!("loading scenario {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    match cmd {
        Command::Run { scenario, dump_tables } => {
            let log = logger();
            let scenario = load(&scenario)?;
            let report = scenario.run(&log)?;

            print_outcomes(&report)?;
            println!();

            if !report.errors.is_empty() {
                println!("Rejected:");
                for e in &report.errors {
                    println!("  {e}");
                }
                println!();
            }

            println!("Expired: {}", report.expired);
            println!();

            let pipeline = &report.pipeline;
            print_table_stats(&pipeline.get_table_stats())?;
            println!();
            print_flow_stats(
                &pipeline.get_flow_stats_at(&FlowFilter::default(), report.end)?,
            )?;

            let groups = pipeline.get_group_stats(GROUP_ALL);
            if !groups.is_empty() {
                println!();
                print_groups(&groups)?;
            }

            if dump_tables {
                for table in pipeline.tables() {
                    println!();
                    print_table(table)?;
                }
            }
        }

        Command::Check { scenario } => {
            let path = scenario;
            load(&path)?
                .check()
                .with_context(|| format!("checking {}", path.display()))?;
            println!("{}: ok", path.display());
        }

        Command::DefaultConfig { format } => {
            let cfg = PipelineConfig::default();
            let out = match format {
                Format::Ron => ron::ser::to_string_pretty(
                    &cfg,
                    ron::ser::PrettyConfig::default(),
                )?,
                Format::Json => serde_json::to_string_pretty(&cfg)?,
            };
            println!("{out}");
        }
    }

    Ok(())
}
