// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Platform hooks that record what the pipeline asks of them.

use ofpipe::api::PacketInReason;
use ofpipe::api::RemovalReason;
use ofpipe::api::SwitchId;
use ofpipe::engine::flow_entry::TableEntry;
use ofpipe::engine::instruction::InstructionSet;
use ofpipe::engine::packet::Packet;
use ofpipe::provider::PlatformHooks;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HookEvent {
    PacketIn { table_id: u8, reason: PacketInReason, send_len: u16 },
    FlowRemoved { reason: RemovalReason, priority: u32, cookie: u64 },
    PacketOut { port: u32, queue: Option<u32> },
    Drop,
    FlowAdd { priority: u32 },
    FlowModify { priority: u32 },
    FlowRemove { priority: u32 },
}

/// Cloning yields a handle onto the same record.
#[derive(Clone, Debug, Default)]
pub struct RecordingHooks {
    events: Arc<Mutex<Vec<HookEvent>>>,
    down_ports: Arc<Mutex<BTreeSet<u32>>>,
}

impl RecordingHooks {
    fn record(&self, ev: HookEvent) {
        self.events.lock().unwrap().push(ev);
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Return the recorded events and start over.
    pub fn take(&self) -> Vec<HookEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn flow_removed(&self) -> Vec<(RemovalReason, u32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HookEvent::FlowRemoved { reason, priority, .. } => {
                    Some((reason, priority))
                }
                _ => None,
            })
            .collect()
    }

    pub fn set_port_live(&self, port: u32, live: bool) {
        let mut down = self.down_ports.lock().unwrap();
        if live {
            down.remove(&port);
        } else {
            down.insert(port);
        }
    }
}

impl PlatformHooks for RecordingHooks {
    fn packet_in(
        &self,
        _sw: &SwitchId,
        table_id: u8,
        _pkt: Packet,
        send_len: u16,
        reason: PacketInReason,
    ) {
        self.record(HookEvent::PacketIn { table_id, reason, send_len });
    }

    fn flow_removed(
        &self,
        _sw: &SwitchId,
        reason: RemovalReason,
        entry: &TableEntry,
    ) {
        self.record(HookEvent::FlowRemoved {
            reason,
            priority: entry.priority(),
            cookie: entry.cookie(),
        });
    }

    fn packet_out(
        &self,
        _sw: &SwitchId,
        _pkt: &Packet,
        port: u32,
        queue: Option<u32>,
    ) {
        self.record(HookEvent::PacketOut { port, queue });
    }

    fn packet_drop(&self, _sw: &SwitchId, _pkt: &Packet) {
        self.record(HookEvent::Drop);
    }

    fn flow_add(&self, entry: &TableEntry) {
        self.record(HookEvent::FlowAdd { priority: entry.priority() });
    }

    fn flow_modify(&self, entry: &TableEntry, _old: &InstructionSet) {
        self.record(HookEvent::FlowModify { priority: entry.priority() });
    }

    fn flow_remove(&self, entry: &TableEntry) {
        self.record(HookEvent::FlowRemove { priority: entry.priority() });
    }

    fn is_port_live(&self, port: u32) -> bool {
        !self.down_ports.lock().unwrap().contains(&port)
    }
}
