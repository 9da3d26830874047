// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Actions: the packet mutation and output primitives.
//!
//! An [`ActionList`] is executed in order by an apply-actions
//! instruction, a group bucket, or a packet-out. An [`ActionSet`]
//! holds at most one action per [`ActionKind`] and is executed in the
//! fixed OpenFlow order when the packet leaves the pipeline.

use super::packet::ETHER_TYPE_VLAN;
use super::packet::Mpls;
use super::packet::PacketMatches;
use super::packet::Vlan;
use super::predicate::Match;
use crate::api::MatchField;
use crate::api::OfVersion;
use crate::api::PORT_ALL;
use crate::api::PORT_ANY;
use crate::api::PORT_CONTROLLER;
use crate::api::PORT_FLOOD;
use crate::api::PORT_IN_PORT;
use crate::api::PORT_LOCAL;
use crate::api::PORT_MAX;
use crate::api::PORT_NORMAL;
use crate::api::PORT_TABLE;
use crate::bit_on;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Send the whole packet to the controller.
pub const MAX_LEN_NO_BUFFER: u16 = 0xffff;

/// Value applied to a newly pushed MPLS TTL when there is no IP TTL
/// to copy.
const DEFAULT_MPLS_TTL: u8 = 64;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Action {
    Output { port: u32, max_len: u16 },
    Group(u32),
    SetQueue(u32),
    CopyTtlIn,
    CopyTtlOut,
    DecNwTtl,
    DecMplsTtl,
    SetNwTtl(u8),
    SetMplsTtl(u8),
    PushVlan(u16),
    PopVlan,
    PushMpls(u16),
    /// Pop the outermost label, the payload has the given ethertype.
    PopMpls(u16),
    PushPbb(u16),
    PopPbb,
    /// Overwrite the field named by the predicate with its value. The
    /// mask of the predicate is ignored.
    SetField(Match),
    Experimenter(u32),
}

/// The kind of an action, ordered as the action set executes them.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum ActionKind {
    CopyTtlIn,
    PopVlan,
    PopMpls,
    PopPbb,
    PushMpls,
    PushPbb,
    PushVlan,
    CopyTtlOut,
    DecMplsTtl,
    DecNwTtl,
    SetMplsTtl,
    SetNwTtl,
    SetField(MatchField),
    SetQueue,
    Group,
    Output,
    Experimenter,
}

impl ActionKind {
    /// Every kind except the per-field set-field kinds.
    pub const FIXED: [ActionKind; 16] = [
        Self::CopyTtlIn,
        Self::PopVlan,
        Self::PopMpls,
        Self::PopPbb,
        Self::PushMpls,
        Self::PushPbb,
        Self::PushVlan,
        Self::CopyTtlOut,
        Self::DecMplsTtl,
        Self::DecNwTtl,
        Self::SetMplsTtl,
        Self::SetNwTtl,
        Self::SetQueue,
        Self::Group,
        Self::Output,
        Self::Experimenter,
    ];

    /// Every kind, set-field once per match field.
    pub fn all() -> impl Iterator<Item = ActionKind> {
        Self::FIXED
            .into_iter()
            .chain(MatchField::ALL.into_iter().map(Self::SetField))
    }

    /// Bit of this kind in an [`ActionKindSet`]. Set-field kinds live
    /// above the fixed ones, one per match field.
    fn index(self) -> u8 {
        match self {
            Self::CopyTtlIn => 0,
            Self::PopVlan => 1,
            Self::PopMpls => 2,
            Self::PopPbb => 3,
            Self::PushMpls => 4,
            Self::PushPbb => 5,
            Self::PushVlan => 6,
            Self::CopyTtlOut => 7,
            Self::DecMplsTtl => 8,
            Self::DecNwTtl => 9,
            Self::SetMplsTtl => 10,
            Self::SetNwTtl => 11,
            Self::SetQueue => 12,
            Self::Group => 13,
            Self::Output => 14,
            Self::Experimenter => 15,
            Self::SetField(f) => 32 + f.index(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CopyTtlIn => "COPY_TTL_IN",
            Self::PopVlan => "POP_VLAN",
            Self::PopMpls => "POP_MPLS",
            Self::PopPbb => "POP_PBB",
            Self::PushMpls => "PUSH_MPLS",
            Self::PushPbb => "PUSH_PBB",
            Self::PushVlan => "PUSH_VLAN",
            Self::CopyTtlOut => "COPY_TTL_OUT",
            Self::DecMplsTtl => "DEC_MPLS_TTL",
            Self::DecNwTtl => "DEC_NW_TTL",
            Self::SetMplsTtl => "SET_MPLS_TTL",
            Self::SetNwTtl => "SET_NW_TTL",
            Self::SetField(_) => "SET_FIELD",
            Self::SetQueue => "SET_QUEUE",
            Self::Group => "GROUP",
            Self::Output => "OUTPUT",
            Self::Experimenter => "EXPERIMENTER",
        }
    }

    /// Can an entry of the given version use this action?
    pub fn supported_by(self, version: OfVersion) -> bool {
        match self {
            Self::Output | Self::SetQueue | Self::PopVlan | Self::PushVlan => {
                true
            }
            Self::SetField(f) => f.supported_by(version),
            Self::PushPbb | Self::PopPbb => version >= OfVersion::V13,
            _ => version >= OfVersion::V12,
        }
    }
}

/// A set of action kinds, used for the capability bitmaps of a table.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct ActionKindSet(u128);

impl ActionKindSet {
    pub const EMPTY: Self = Self(0);

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.0 & bit_on(kind.index()) != 0
    }

    pub fn insert(&mut self, kind: ActionKind) {
        self.0 |= bit_on(kind.index());
    }

    pub fn remove(&mut self, kind: ActionKind) {
        self.0 &= !bit_on(kind.index());
    }
}

impl FromIterator<ActionKind> for ActionKindSet {
    fn from_iter<I: IntoIterator<Item = ActionKind>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

/// What the caller must do after an action has run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionEffect {
    /// The packet headers were updated in place, if at all.
    None,
    Output { port: u32, max_len: u16 },
    Group(u32),
    /// A TTL decrement hit zero; the packet must not be forwarded.
    InvalidTtl,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Output { .. } => ActionKind::Output,
            Self::Group(_) => ActionKind::Group,
            Self::SetQueue(_) => ActionKind::SetQueue,
            Self::CopyTtlIn => ActionKind::CopyTtlIn,
            Self::CopyTtlOut => ActionKind::CopyTtlOut,
            Self::DecNwTtl => ActionKind::DecNwTtl,
            Self::DecMplsTtl => ActionKind::DecMplsTtl,
            Self::SetNwTtl(_) => ActionKind::SetNwTtl,
            Self::SetMplsTtl(_) => ActionKind::SetMplsTtl,
            Self::PushVlan(_) => ActionKind::PushVlan,
            Self::PopVlan => ActionKind::PopVlan,
            Self::PushMpls(_) => ActionKind::PushMpls,
            Self::PopMpls(_) => ActionKind::PopMpls,
            Self::PushPbb(_) => ActionKind::PushPbb,
            Self::PopPbb => ActionKind::PopPbb,
            Self::SetField(m) => ActionKind::SetField(m.field()),
            Self::Experimenter(_) => ActionKind::Experimenter,
        }
    }

    pub fn output(port: u32) -> Self {
        Self::Output { port, max_len: MAX_LEN_NO_BUFFER }
    }

    pub fn set_field(field: MatchField, value: u128) -> Self {
        Self::SetField(Match::exact(field, value))
    }

    /// Run the action against the packet headers.
    ///
    /// Outputs and group redirects are not performed here; they are
    /// reported back for the pipeline to carry out.
    pub fn apply(&self, pkt: &mut PacketMatches) -> ActionEffect {
        match *self {
            Self::Output { port, max_len } => {
                return ActionEffect::Output { port, max_len };
            }

            Self::Group(id) => return ActionEffect::Group(id),

            // Queues are a property of the egress port, which the
            // platform owns.
            Self::SetQueue(_) | Self::Experimenter(_) => {}

            Self::CopyTtlIn => {
                if let (Some(mpls), Some(ip)) = (pkt.mpls, pkt.ip.as_mut()) {
                    ip.ttl = mpls.ttl;
                }
            }

            Self::CopyTtlOut => {
                if let (Some(mpls), Some(ip)) = (pkt.mpls.as_mut(), pkt.ip) {
                    mpls.ttl = ip.ttl;
                }
            }

            Self::DecNwTtl => {
                if let Some(ip) = pkt.ip.as_mut() {
                    if ip.ttl <= 1 {
                        ip.ttl = 0;
                        return ActionEffect::InvalidTtl;
                    }
                    ip.ttl -= 1;
                }
            }

            Self::DecMplsTtl => {
                if let Some(mpls) = pkt.mpls.as_mut() {
                    if mpls.ttl <= 1 {
                        mpls.ttl = 0;
                        return ActionEffect::InvalidTtl;
                    }
                    mpls.ttl -= 1;
                }
            }

            Self::SetNwTtl(ttl) => {
                if let Some(ip) = pkt.ip.as_mut() {
                    ip.ttl = ttl;
                }
            }

            Self::SetMplsTtl(ttl) => {
                if let Some(mpls) = pkt.mpls.as_mut() {
                    mpls.ttl = ttl;
                }
            }

            // A new outer tag copies the fields of the tag it covers.
            Self::PushVlan(_) => {
                pkt.vlan = Some(pkt.vlan.unwrap_or_default());
            }

            Self::PopVlan => pkt.vlan = None,

            Self::PushMpls(ethertype) => {
                let ttl = match (pkt.mpls, pkt.ip) {
                    (Some(m), _) => m.ttl,
                    (None, Some(ip)) => ip.ttl,
                    (None, None) => DEFAULT_MPLS_TTL,
                };
                let bos = pkt.mpls.is_none();
                let (label, tc) =
                    pkt.mpls.map(|m| (m.label, m.tc)).unwrap_or((0, 0));
                pkt.mpls = Some(Mpls { label, tc, bos, ttl });
                pkt.eth_type = ethertype;
            }

            Self::PopMpls(ethertype) => {
                pkt.mpls = None;
                pkt.eth_type = ethertype;
            }

            Self::PushPbb(_) => {
                pkt.pbb_isid = Some(pkt.pbb_isid.unwrap_or(0));
            }

            Self::PopPbb => pkt.pbb_isid = None,

            Self::SetField(m) => {
                // Setting a VID on an untagged packet tags it, as the
                // OpenFlow 1.0 set_vlan_vid action does.
                if m.field() == MatchField::VlanVid && pkt.vlan.is_none() {
                    pkt.vlan = Some(Vlan::default());
                }
                pkt.set(m.field(), m.value());
            }
        }

        ActionEffect::None
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Output { port, .. } => write!(f, "output:{}", PortName(*port)),
            Self::Group(id) => write!(f, "group:{id}"),
            Self::SetQueue(q) => write!(f, "set_queue:{q}"),
            Self::CopyTtlIn => write!(f, "copy_ttl_in"),
            Self::CopyTtlOut => write!(f, "copy_ttl_out"),
            Self::DecNwTtl => write!(f, "dec_nw_ttl"),
            Self::DecMplsTtl => write!(f, "dec_mpls_ttl"),
            Self::SetNwTtl(t) => write!(f, "set_nw_ttl:{t}"),
            Self::SetMplsTtl(t) => write!(f, "set_mpls_ttl:{t}"),
            Self::PushVlan(et) => write!(f, "push_vlan:{et:#06x}"),
            Self::PopVlan => write!(f, "pop_vlan"),
            Self::PushMpls(et) => write!(f, "push_mpls:{et:#06x}"),
            Self::PopMpls(et) => write!(f, "pop_mpls:{et:#06x}"),
            Self::PushPbb(et) => write!(f, "push_pbb:{et:#06x}"),
            Self::PopPbb => write!(f, "pop_pbb"),
            Self::SetField(m) => write!(f, "set_field:{m}"),
            Self::Experimenter(id) => write!(f, "experimenter:{id:#x}"),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    /// Parse the textual form produced by `Display`, e.g.
    /// `output:3`, `output:controller`, `set_field:TCP_DST=80` or
    /// `pop_vlan`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((n, a)) => (n, Some(a.trim())),
            None => (s, None),
        };

        let num = |a: Option<&str>| -> Result<u32, String> {
            let a = a.ok_or_else(|| format!("{name} needs an argument"))?;
            let res = match a.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => a.parse::<u32>(),
            };
            res.map_err(|e| format!("bad argument to {name}: {e}"))
        };
        let ethertype = |a: Option<&str>, dflt: u16| -> Result<u16, String> {
            match a {
                Some(_) => u16::try_from(num(a)?).map_err(|e| e.to_string()),
                None => Ok(dflt),
            }
        };
        let ttl = |a: Option<&str>| -> Result<u8, String> {
            u8::try_from(num(a)?).map_err(|e| e.to_string())
        };

        match name.to_ascii_lowercase().as_str() {
            "output" => {
                let a = arg.ok_or("output needs a port")?;
                let port = match PortName::parse(a) {
                    Some(p) => p,
                    None => num(arg)?,
                };
                Ok(Self::output(port))
            }
            "group" => Ok(Self::Group(num(arg)?)),
            "set_queue" => Ok(Self::SetQueue(num(arg)?)),
            "copy_ttl_in" => Ok(Self::CopyTtlIn),
            "copy_ttl_out" => Ok(Self::CopyTtlOut),
            "dec_nw_ttl" => Ok(Self::DecNwTtl),
            "dec_mpls_ttl" => Ok(Self::DecMplsTtl),
            "set_nw_ttl" => Ok(Self::SetNwTtl(ttl(arg)?)),
            "set_mpls_ttl" => Ok(Self::SetMplsTtl(ttl(arg)?)),
            "push_vlan" => Ok(Self::PushVlan(ethertype(arg, ETHER_TYPE_VLAN)?)),
            "pop_vlan" => Ok(Self::PopVlan),
            "push_mpls" => Ok(Self::PushMpls(ethertype(arg, 0x8847)?)),
            "pop_mpls" => Ok(Self::PopMpls(ethertype(arg, 0x0800)?)),
            "push_pbb" => Ok(Self::PushPbb(ethertype(arg, 0x88e7)?)),
            "pop_pbb" => Ok(Self::PopPbb),
            "set_field" => {
                let m: Match = arg.ok_or("set_field needs FIELD=VALUE")?.parse()?;
                Ok(Self::SetField(m))
            }
            "experimenter" => Ok(Self::Experimenter(num(arg)?)),
            _ => Err(format!("unknown action: {name}")),
        }
    }
}

/// Display helper naming the reserved ports.
pub struct PortName(pub u32);

impl PortName {
    fn parse(s: &str) -> Option<u32> {
        let port = match s.to_ascii_lowercase().as_str() {
            "in_port" => PORT_IN_PORT,
            "table" => PORT_TABLE,
            "normal" => PORT_NORMAL,
            "flood" => PORT_FLOOD,
            "all" => PORT_ALL,
            "controller" => PORT_CONTROLLER,
            "local" => PORT_LOCAL,
            "any" => PORT_ANY,
            _ => return None,
        };
        Some(port)
    }
}

impl Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            PORT_IN_PORT => write!(f, "IN_PORT"),
            PORT_TABLE => write!(f, "TABLE"),
            PORT_NORMAL => write!(f, "NORMAL"),
            PORT_FLOOD => write!(f, "FLOOD"),
            PORT_ALL => write!(f, "ALL"),
            PORT_CONTROLLER => write!(f, "CONTROLLER"),
            PORT_LOCAL => write!(f, "LOCAL"),
            PORT_ANY => write!(f, "ANY"),
            p => write!(f, "{p}"),
        }
    }
}

/// Is `port` a valid target for an output action?
pub fn is_valid_output_port(port: u32) -> bool {
    (port != 0 && port <= PORT_MAX)
        || matches!(
            port,
            PORT_IN_PORT
                | PORT_TABLE
                | PORT_NORMAL
                | PORT_FLOOD
                | PORT_ALL
                | PORT_CONTROLLER
                | PORT_LOCAL
        )
}

/// An ordered list of actions, executed front to back.
///
/// Tracks the aggregate properties validation and lookup filters need
/// without walking the list.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "Vec<Action>", into = "Vec<Action>")]
pub struct ActionList {
    actions: Vec<Action>,
    num_outputs: u32,
}

impl From<Vec<Action>> for ActionList {
    fn from(actions: Vec<Action>) -> Self {
        let num_outputs = actions
            .iter()
            .filter(|a| matches!(a, Action::Output { .. } | Action::Group(_)))
            .count() as u32;
        Self { actions, num_outputs }
    }
}

impl From<ActionList> for Vec<Action> {
    fn from(list: ActionList) -> Self {
        list.actions
    }
}

impl ActionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        if matches!(action, Action::Output { .. } | Action::Group(_)) {
            self.num_outputs += 1;
        }
        self.actions.push(action);
    }

    pub fn with(mut self, action: Action) -> Self {
        self.push(action);
        self
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The number of output and group actions.
    pub fn num_outputs(&self) -> u32 {
        self.num_outputs
    }

    /// Can an entry of the given version use every action of the list?
    pub fn supported_by(&self, version: OfVersion) -> bool {
        self.actions.iter().all(|a| a.kind().supported_by(version))
    }

    /// Does the list output to `port`? `PORT_ANY` always matches.
    pub fn has_output(&self, port: u32) -> bool {
        port == PORT_ANY
            || self.actions.iter().any(
                |a| matches!(a, Action::Output { port: p, .. } if *p == port),
            )
    }

    /// Does the list reference group `id`?
    pub fn has_group(&self, id: u32) -> bool {
        self.actions.iter().any(|a| matches!(a, Action::Group(g) if *g == id))
    }

    pub fn groups(&self) -> impl Iterator<Item = u32> + '_ {
        self.actions.iter().filter_map(|a| match a {
            Action::Group(id) => Some(*id),
            _ => None,
        })
    }
}

impl Display for ActionList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for a in &self.actions {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{a}")?;
            first = false;
        }
        Ok(())
    }
}

/// The per-packet action set built by write-actions instructions.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActionSet {
    actions: BTreeMap<ActionKind, Action>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `list` into the set; an action replaces any existing one
    /// of the same kind.
    pub fn write(&mut self, list: &ActionList) {
        for a in list.iter() {
            self.actions.insert(a.kind(), *a);
        }
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// The actions in execution order. When a group action is present
    /// the output action is ignored.
    pub fn iter(&self) -> impl Iterator<Item = &Action> + '_ {
        let has_group = self.actions.contains_key(&ActionKind::Group);
        self.actions
            .iter()
            .filter(move |(k, _)| !(has_group && **k == ActionKind::Output))
            .map(|(_, a)| a)
    }
}
