// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers plug the services of the embedding switch into the
//! engine: where log messages go, and how packets and flow events
//! leave the pipeline. A provider is injected when the pipeline is
//! built; the engine never reaches for a global.

use crate::api::PacketInReason;
use crate::api::RemovalReason;
use crate::api::SwitchId;
use crate::engine::flow_entry::TableEntry;
use crate::engine::instruction::InstructionSet;
use crate::engine::packet::Packet;
use core::fmt;
use core::fmt::Display;

/// The set of all platform-specific providers required by a pipeline.
pub struct Providers {
    pub log: Box<dyn LogProvider>,
    pub hooks: Box<dyn PlatformHooks>,
}

/// Where the engine's own diagnostics go, such as rejected flow-mods
/// and expiry sweeps.
pub trait LogProvider: Send + Sync {
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Note => "note",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// Discards everything.
#[derive(Clone, Copy)]
pub struct NullLog;

impl LogProvider for NullLog {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

/// Forward to a [`slog::Logger`].
#[cfg(feature = "std")]
pub struct SlogLog(pub slog::Logger);

#[cfg(feature = "std")]
impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => slog::info!(self.0, "{}", msg),
            LogLevel::Warn => slog::warn!(self.0, "{}", msg),
            LogLevel::Error => slog::error!(self.0, "{}", msg),
        }
    }
}

/// The boundary between the pipeline and the switch it runs in.
///
/// The three required hooks carry traffic and events to the
/// controller side. The rest mirror table changes to an optional
/// offload backend; they are best effort and cannot fail the
/// operation that triggered them.
///
/// Packet hooks run after every table lock has been released. Flow
/// event hooks may run with the table's writer lock held, so a hook
/// handed a [`TableEntry`] must not call back into flow-mod operations
/// of the same table, nor delete groups.
pub trait PlatformHooks: Send + Sync {
    /// Hand `pkt` to the controller. The callee owns the packet. At
    /// most `send_len` bytes of its data are meant to be sent.
    fn packet_in(
        &self,
        sw: &SwitchId,
        table_id: u8,
        pkt: Packet,
        send_len: u16,
        reason: PacketInReason,
    );

    /// An entry asking for removal notification has been removed. The
    /// entry is no longer reachable from its table.
    fn flow_removed(
        &self,
        sw: &SwitchId,
        reason: RemovalReason,
        entry: &TableEntry,
    );

    /// Transmit `pkt` on `port`, which may be any reserved port other
    /// than `TABLE`, `IN_PORT` and `CONTROLLER`.
    fn packet_out(
        &self,
        sw: &SwitchId,
        pkt: &Packet,
        port: u32,
        queue: Option<u32>,
    );

    fn packet_drop(&self, _sw: &SwitchId, _pkt: &Packet) {}

    fn flow_add(&self, _entry: &TableEntry) {}

    fn flow_modify(&self, _entry: &TableEntry, _old: &InstructionSet) {}

    fn flow_remove(&self, _entry: &TableEntry) {}

    /// Called before an entry's counters are read, so a backend can
    /// fold its own counters into them.
    fn stats_refresh(&self, _entry: &TableEntry) {}

    /// Is `port` up? Consulted by fast-failover groups.
    fn is_port_live(&self, _port: u32) -> bool {
        true
    }
}
