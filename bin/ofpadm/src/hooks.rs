// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use ofpipe::api::PacketInReason;
use ofpipe::api::RemovalReason;
use ofpipe::api::SwitchId;
use ofpipe::engine::flow_entry::TableEntry;
use ofpipe::engine::instruction::InstructionSet;
use ofpipe::engine::packet::Packet;
use ofpipe::provider::PlatformHooks;
use slog::Logger;
use slog::debug;
use slog::info;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

/// Platform hooks that log every event.
///
/// Ports listed as down are reported as such to fast-failover groups;
/// every other port is live. Clones share the set of down ports.
#[derive(Clone)]
pub struct LogHooks {
    log: Logger,
    down_ports: Arc<Mutex<BTreeSet<u32>>>,
}

impl LogHooks {
    pub fn new(log: Logger, down_ports: impl IntoIterator<Item = u32>) -> Self {
        Self {
            log,
            down_ports: Arc::new(Mutex::new(down_ports.into_iter().collect())),
        }
    }

    pub fn set_port_live(&self, port: u32, live: bool) {
        let Ok(mut down) = self.down_ports.lock() else {
            return;
        };
        if live {
            down.remove(&port);
        } else {
            down.insert(port);
        }
    }
}

impl PlatformHooks for LogHooks {
    fn packet_in(
        &self,
        sw: &SwitchId,
        table_id: u8,
        pkt: Packet,
        send_len: u16,
        reason: PacketInReason,
    ) {
        info!(self.log, "packet-in";
            "switch" => %sw,
            "table" => table_id,
            "reason" => %reason,
            "send_len" => send_len,
            "in_port" => pkt.matches.in_port,
        );
    }

    fn flow_removed(
        &self,
        sw: &SwitchId,
        reason: RemovalReason,
        entry: &TableEntry,
    ) {
        info!(self.log, "flow removed";
            "switch" => %sw,
            "reason" => %reason,
            "entry" => %entry,
        );
    }

    fn packet_out(
        &self,
        sw: &SwitchId,
        pkt: &Packet,
        port: u32,
        queue: Option<u32>,
    ) {
        debug!(self.log, "packet-out";
            "switch" => %sw,
            "port" => port,
            "queue" => ?queue,
            "len" => pkt.len,
        );
    }

    fn packet_drop(&self, sw: &SwitchId, pkt: &Packet) {
        debug!(self.log, "drop"; "switch" => %sw, "in_port" => pkt.matches.in_port);
    }

    fn flow_add(&self, entry: &TableEntry) {
        debug!(self.log, "flow add"; "entry" => %entry);
    }

    fn flow_modify(&self, entry: &TableEntry, old: &InstructionSet) {
        debug!(self.log, "flow modify"; "entry" => %entry, "old" => %old);
    }

    fn flow_remove(&self, entry: &TableEntry) {
        debug!(self.log, "flow remove"; "entry" => %entry);
    }

    fn is_port_live(&self, port: u32) -> bool {
        self.down_ports.lock().map(|down| !down.contains(&port)).unwrap_or(true)
    }
}
