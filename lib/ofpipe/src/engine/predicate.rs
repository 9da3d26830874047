// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Match predicates used for flow entry matching.
//!
//! Every predicate is a ternary `(value, mask)` comparison over one
//! packet field. A [`FlowMatch`] is the AND of its predicates.

use super::packet::PacketMatches;
use crate::api::MacAddr;
use crate::api::MatchDump;
use crate::api::MatchField;
use crate::api::VLAN_PRESENT;
use crate::bit_on;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use itertools::EitherOrBoth;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

/// A ternary comparison over a single packet field.
///
/// The value is always stored pre-masked, and both value and mask are
/// truncated to the width of the field, so two predicates selecting
/// the same packets compare equal.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "RawMatch")]
pub struct Match {
    field: MatchField,
    value: u128,
    mask: u128,
}

// Deserialized predicates go through `Match::new` so that the
// normalization invariant holds for configuration input as well.
#[derive(Deserialize)]
struct RawMatch {
    field: MatchField,
    value: u128,
    #[serde(default)]
    mask: Option<u128>,
}

impl From<RawMatch> for Match {
    fn from(raw: RawMatch) -> Self {
        let mask = raw.mask.unwrap_or_else(|| raw.field.full_mask());
        Match::new(raw.field, raw.value, mask)
    }
}

impl Match {
    pub fn new(field: MatchField, value: u128, mask: u128) -> Self {
        let mask = mask & field.full_mask();
        Self { field, value: value & mask, mask }
    }

    /// Match the field against `value` exactly.
    pub fn exact(field: MatchField, value: u128) -> Self {
        Self::new(field, value, field.full_mask())
    }

    pub fn field(&self) -> MatchField {
        self.field
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn mask(&self) -> u128 {
        self.mask
    }

    /// Does this predicate compare every bit of the field?
    pub fn is_exact(&self) -> bool {
        self.mask == self.field.full_mask()
    }

    pub fn matches_value(&self, val: u128) -> bool {
        (val & self.mask) == self.value
    }

    /// Does the packet satisfy this predicate? A packet lacking the
    /// header that carries the field never does.
    pub fn is_match(&self, pkt: &PacketMatches) -> bool {
        match pkt.get(self.field) {
            Some(val) => self.matches_value(val),
            None => false,
        }
    }

    /// Is every packet accepted by `self` also accepted by `other`?
    ///
    /// Both predicates must be over the same field.
    pub fn refines(&self, other: &Match) -> bool {
        self.field == other.field
            && (other.mask & !self.mask) == 0
            && (self.value & other.mask) == other.value
    }

    /// Is there at least one field value accepted by both predicates?
    pub fn intersects(&self, other: &Match) -> bool {
        self.field != other.field
            || ((self.value ^ other.value) & self.mask & other.mask) == 0
    }

    pub fn in_port(port: u32) -> Self {
        Self::exact(MatchField::InPort, port.into())
    }

    pub fn metadata(value: u64, mask: u64) -> Self {
        Self::new(MatchField::Metadata, value.into(), mask.into())
    }

    pub fn eth_dst(mac: MacAddr) -> Self {
        Self::exact(MatchField::EthDst, mac.to_u64().into())
    }

    pub fn eth_dst_masked(mac: MacAddr, mask: MacAddr) -> Self {
        Self::new(
            MatchField::EthDst,
            mac.to_u64().into(),
            mask.to_u64().into(),
        )
    }

    pub fn eth_src(mac: MacAddr) -> Self {
        Self::exact(MatchField::EthSrc, mac.to_u64().into())
    }

    pub fn eth_type(ethertype: u16) -> Self {
        Self::exact(MatchField::EthType, ethertype.into())
    }

    /// Match packets tagged with VLAN `vid`.
    pub fn vlan_vid(vid: u16) -> Self {
        Self::exact(MatchField::VlanVid, u128::from(VLAN_PRESENT | vid))
    }

    /// Match untagged packets only.
    pub fn no_vlan() -> Self {
        Self::exact(MatchField::VlanVid, 0)
    }

    /// Match tagged packets regardless of their VID.
    pub fn any_vlan() -> Self {
        Self::new(
            MatchField::VlanVid,
            VLAN_PRESENT.into(),
            VLAN_PRESENT.into(),
        )
    }

    pub fn ip_proto(proto: u8) -> Self {
        Self::exact(MatchField::IpProto, proto.into())
    }

    pub fn ipv4_src(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self::ipv4(MatchField::Ipv4Src, addr, prefix_len)
    }

    pub fn ipv4_dst(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self::ipv4(MatchField::Ipv4Dst, addr, prefix_len)
    }

    fn ipv4(field: MatchField, addr: Ipv4Addr, prefix_len: u8) -> Self {
        let mask = match prefix_len.min(32) {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n)),
        };
        Self::new(field, u32::from(addr).into(), mask.into())
    }

    pub fn ipv6_src(addr: Ipv6Addr, prefix_len: u8) -> Self {
        Self::ipv6(MatchField::Ipv6Src, addr, prefix_len)
    }

    pub fn ipv6_dst(addr: Ipv6Addr, prefix_len: u8) -> Self {
        Self::ipv6(MatchField::Ipv6Dst, addr, prefix_len)
    }

    fn ipv6(field: MatchField, addr: Ipv6Addr, prefix_len: u8) -> Self {
        let mask = match prefix_len.min(128) {
            0 => 0,
            n => u128::MAX << (128 - u32::from(n)),
        };
        Self::new(field, u128::from(addr), mask)
    }

    pub fn tcp_dst(port: u16) -> Self {
        Self::exact(MatchField::TcpDst, port.into())
    }

    pub fn tcp_src(port: u16) -> Self {
        Self::exact(MatchField::TcpSrc, port.into())
    }

    pub fn udp_dst(port: u16) -> Self {
        Self::exact(MatchField::UdpDst, port.into())
    }

    pub fn udp_src(port: u16) -> Self {
        Self::exact(MatchField::UdpSrc, port.into())
    }

    pub fn dump(&self) -> MatchDump {
        MatchDump { field: self.field, value: self.value, mask: self.mask }
    }
}

impl Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use MatchField::*;

        let full = self.is_exact();
        match self.field {
            EthDst | EthSrc | ArpSha | ArpTha | Ipv6NdSll | Ipv6NdTll => {
                // Truncation is fine, the value is masked to 48 bits.
                let mac = MacAddr::from_u64(self.value as u64);
                write!(f, "{}={mac}", self.field)?;
            }

            Ipv4Src | Ipv4Dst | ArpSpa | ArpTpa | NwSrc | NwDst => {
                let ip = Ipv4Addr::from(self.value as u32);
                write!(f, "{}={ip}", self.field)?;
            }

            Ipv6Src | Ipv6Dst | Ipv6NdTarget => {
                let ip = Ipv6Addr::from(self.value);
                write!(f, "{}={ip}", self.field)?;
            }

            VlanVid if full && self.value == 0 => {
                return write!(f, "{}=NONE", self.field);
            }

            VlanVid if !full && self.mask == u128::from(VLAN_PRESENT) => {
                return write!(f, "{}=ANY", self.field);
            }

            _ => write!(f, "{}={:#x}", self.field, self.value)?,
        }

        if !full {
            write!(f, "/{:#x}", self.mask)?;
        }

        Ok(())
    }
}

impl FromStr for Match {
    type Err = String;

    /// Parse `FIELD=VALUE[/MASK]`. Addresses use their usual textual
    /// form and an IPv4/IPv6 mask may be given as a prefix length.
    /// `VLAN_VID=NONE` and `VLAN_VID=ANY` are also accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use MatchField::*;

        let (name, rest) =
            s.split_once('=').ok_or_else(|| format!("missing '=': {s}"))?;
        let field = MatchField::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| format!("unknown field: {name}"))?;
        let rest = rest.trim();

        if field == VlanVid {
            if rest.eq_ignore_ascii_case("none") {
                return Ok(Match::no_vlan());
            }
            if rest.eq_ignore_ascii_case("any") {
                return Ok(Match::any_vlan());
            }
            let vid = parse_int(rest)?;
            return Ok(Match::vlan_vid((vid & 0xfff) as u16));
        }

        let (val_s, mask_s) = match rest.split_once('/') {
            Some((v, m)) => (v, Some(m)),
            None => (rest, None),
        };

        match field {
            EthDst | EthSrc | ArpSha | ArpTha | Ipv6NdSll | Ipv6NdTll => {
                let val = val_s.parse::<MacAddr>()?.to_u64();
                let mask = match mask_s {
                    Some(m) => u128::from(m.parse::<MacAddr>()?.to_u64()),
                    None => field.full_mask(),
                };
                Ok(Match::new(field, val.into(), mask))
            }

            Ipv4Src | Ipv4Dst | ArpSpa | ArpTpa | NwSrc | NwDst => {
                let ip = val_s
                    .parse::<Ipv4Addr>()
                    .map_err(|e| format!("bad IPv4 address: {e}"))?;
                let prefix = match mask_s {
                    Some(m) => m.parse::<u8>().map_err(|e| e.to_string())?,
                    None => 32,
                };
                Ok(Match::ipv4(field, ip, prefix))
            }

            Ipv6Src | Ipv6Dst | Ipv6NdTarget => {
                let ip = val_s
                    .parse::<Ipv6Addr>()
                    .map_err(|e| format!("bad IPv6 address: {e}"))?;
                let prefix = match mask_s {
                    Some(m) => m.parse::<u8>().map_err(|e| e.to_string())?,
                    None => 128,
                };
                Ok(Match::ipv6(field, ip, prefix))
            }

            _ => {
                let val = parse_int(val_s)?;
                let mask = match mask_s {
                    Some(m) => parse_int(m)?,
                    None => field.full_mask(),
                };
                Ok(Match::new(field, val, mask))
            }
        }
    }
}

fn parse_int(s: &str) -> Result<u128, String> {
    let s = s.trim();
    let res = match s.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => s.parse::<u128>(),
    };
    res.map_err(|e| format!("bad integer {s}: {e}"))
}

/// A set of match fields, used for the capability bitmaps of a table.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct FieldSet(u128);

impl FieldSet {
    pub const EMPTY: Self = Self(0);

    pub fn contains(&self, field: MatchField) -> bool {
        self.0 & bit_on(field.index()) != 0
    }

    pub fn insert(&mut self, field: MatchField) {
        self.0 |= bit_on(field.index());
    }

    pub fn remove(&mut self, field: MatchField) {
        self.0 &= !bit_on(field.index());
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = MatchField> + '_ {
        MatchField::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl FromIterator<MatchField> for FieldSet {
    fn from_iter<I: IntoIterator<Item = MatchField>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for field in iter {
            set.insert(field);
        }
        set
    }
}

/// The AND-combined predicates of one flow entry.
///
/// Predicates are kept sorted by field. Semantics do not depend on the
/// order, but a fixed order makes equality a linear walk and gives the
/// trie a canonical path for every entry.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "Vec<Match>", into = "Vec<Match>")]
pub struct FlowMatch {
    matches: Vec<Match>,
}

impl From<Vec<Match>> for FlowMatch {
    fn from(mut matches: Vec<Match>) -> Self {
        matches.sort_by_key(|m| m.field);
        Self { matches }
    }
}

impl From<FlowMatch> for Vec<Match> {
    fn from(fm: FlowMatch) -> Self {
        fm.matches
    }
}

impl FlowMatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate, keeping field order.
    pub fn push(&mut self, m: Match) {
        let pos = self.matches.partition_point(|x| x.field <= m.field);
        self.matches.insert(pos, m);
    }

    pub fn with(mut self, m: Match) -> Self {
        self.push(m);
        self
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Match> {
        self.matches.iter()
    }

    pub fn as_slice(&self) -> &[Match] {
        &self.matches
    }

    pub fn get(&self, field: MatchField) -> Option<&Match> {
        self.matches.iter().find(|m| m.field == field)
    }

    /// Does the packet satisfy every predicate?
    pub fn is_match(&self, pkt: &PacketMatches) -> bool {
        self.matches.iter().all(|m| m.is_match(pkt))
    }

    /// Is any predicate masked?
    pub fn has_wildcard(&self) -> bool {
        self.matches.iter().any(|m| !m.is_exact())
    }

    /// Are both predicate sets identical?
    pub fn is_equal(&self, other: &FlowMatch) -> bool {
        self.matches == other.matches
    }

    /// Is every packet accepted by `self` also accepted by `other`?
    ///
    /// That is the case when each predicate of `other` is refined by
    /// the predicate of `self` over the same field. A field `other`
    /// constrains but `self` does not disqualifies `self`.
    pub fn refines(&self, other: &FlowMatch) -> bool {
        self.merged(other).all(|pair| match pair {
            EitherOrBoth::Both(m, o) => m.refines(o),
            EitherOrBoth::Left(_) => true,
            EitherOrBoth::Right(_) => false,
        })
    }

    /// Could a single packet satisfy both predicate sets?
    ///
    /// Fields constrained by only one side never rule out an overlap,
    /// so this reduces to a per-field intersection over the shared
    /// fields.
    pub fn overlaps(&self, other: &FlowMatch) -> bool {
        self.merged(other).all(|pair| match pair {
            EitherOrBoth::Both(m, o) => m.intersects(o),
            _ => true,
        })
    }

    // Both sides are sorted by field, so a merge pairs up the
    // predicates over shared fields.
    fn merged<'a>(
        &'a self,
        other: &'a FlowMatch,
    ) -> impl Iterator<Item = EitherOrBoth<&'a Match, &'a Match>> {
        self.matches
            .iter()
            .merge_join_by(other.matches.iter(), |a, b| a.field.cmp(&b.field))
    }

    pub fn fields(&self) -> FieldSet {
        self.matches.iter().map(|m| m.field).collect()
    }

    /// The first field appearing more than once, if any.
    pub fn duplicate_field(&self) -> Option<MatchField> {
        self.matches.windows(2).find_map(|w| {
            if w[0].field == w[1].field { Some(w[0].field) } else { None }
        })
    }

    pub fn dump(&self) -> Vec<MatchDump> {
        self.matches.iter().map(Match::dump).collect()
    }
}

impl Display for FlowMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.matches.is_empty() {
            return write!(f, "*");
        }

        let mut first = true;
        for m in &self.matches {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{m}")?;
            first = false;
        }

        Ok(())
    }
}
