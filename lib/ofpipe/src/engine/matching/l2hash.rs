// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Hash-assisted lookup for layer 2 forwarding tables.
//!
//! Entries matching exactly a destination MAC, or exactly a
//! destination MAC and a VLAN ID, are indexed by those keys. A lookup
//! probes both indexes with the packet's values, then scans the
//! remaining entries in order, stopping as soon as no remaining entry
//! could beat the best hash hit.

use super::EntryList;
use super::MatchingAlgorithm;
use super::scan_ordered;
use crate::api::MatchField;
use crate::api::MatchingAlgorithmKind;
use crate::engine::arena::EntryHandle;
use crate::engine::flow_entry::OrderKey;
use crate::engine::flow_entry::TableEntry;
use crate::engine::packet::PacketMatches;
use crate::engine::predicate::FlowMatch;
use core::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::HashMap;

type Bucket = BTreeMap<Reverse<OrderKey>, EntryHandle>;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum L2Key {
    Dst(u64),
    DstVlan(u64, u16),
}

impl L2Key {
    /// The hash key of a match set, if it is purely layer 2.
    fn from_matches(matches: &FlowMatch) -> Option<Self> {
        let preds = matches.as_slice();
        let dst = preds.iter().find(|m| m.field() == MatchField::EthDst)?;
        if !dst.is_exact() {
            return None;
        }
        let mac = dst.value() as u64;

        match preds.len() {
            1 => Some(Self::Dst(mac)),
            2 => {
                let vid =
                    preds.iter().find(|m| m.field() == MatchField::VlanVid)?;
                vid.is_exact().then_some(Self::DstVlan(mac, vid.value() as u16))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct L2Hash {
    no_vlan: HashMap<u64, Bucket>,
    vlan: HashMap<(u64, u16), Bucket>,
    residual: Bucket,
}

impl L2Hash {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_mut(&mut self, key: Option<L2Key>) -> &mut Bucket {
        match key {
            Some(L2Key::Dst(mac)) => self.no_vlan.entry(mac).or_default(),
            Some(L2Key::DstVlan(mac, vid)) => {
                self.vlan.entry((mac, vid)).or_default()
            }
            None => &mut self.residual,
        }
    }
}

impl MatchingAlgorithm for L2Hash {
    fn kind(&self) -> MatchingAlgorithmKind {
        MatchingAlgorithmKind::L2Hash
    }

    fn add(&mut self, entry: &TableEntry) {
        let key = L2Key::from_matches(entry.matches());
        self.bucket_mut(key).insert(Reverse(entry.key()), entry.handle());
    }

    fn remove(&mut self, entry: &TableEntry) {
        let key = L2Key::from_matches(entry.matches());
        let bucket = self.bucket_mut(key);
        bucket.remove(&Reverse(entry.key()));
        if !bucket.is_empty() {
            return;
        }

        match key {
            Some(L2Key::Dst(mac)) => {
                self.no_vlan.remove(&mac);
            }
            Some(L2Key::DstVlan(mac, vid)) => {
                self.vlan.remove(&(mac, vid));
            }
            None => {}
        }
    }

    fn find_best_match(
        &self,
        list: &EntryList,
        pkt: &PacketMatches,
    ) -> Option<EntryHandle> {
        let dst = pkt.eth_dst.to_u64();
        // Always present: zero when the packet is untagged.
        let vid = pkt.get(MatchField::VlanVid).unwrap_or(0) as u16;

        // Every entry in a bucket matches, so its first is its best.
        let hits = [self.no_vlan.get(&dst), self.vlan.get(&(dst, vid))];
        let best = hits
            .into_iter()
            .flatten()
            .filter_map(|b| b.iter().next())
            .map(|(Reverse(k), h)| (*k, *h))
            .max_by_key(|(k, _)| *k);

        let floor = best.map(|(k, _)| k);
        match scan_ordered(self.residual.iter(), list, pkt, floor) {
            Some((_, h)) => Some(h),
            None => best.map(|(_, h)| h),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::MacAddr;
    use crate::engine::predicate::Match;

    const MAC1: MacAddr = MacAddr::from_const([0xa8, 0x40, 0x25, 0, 0, 1]);

    #[test]
    fn l2_keys() {
        let m = FlowMatch::new().with(Match::eth_dst(MAC1));
        assert_eq!(L2Key::from_matches(&m), Some(L2Key::Dst(MAC1.to_u64())));

        let m = m.with(Match::vlan_vid(7));
        assert_eq!(
            L2Key::from_matches(&m),
            Some(L2Key::DstVlan(MAC1.to_u64(), 0x1000 | 7))
        );

        let m = FlowMatch::new().with(Match::eth_dst(MAC1)).with(Match::in_port(1));
        assert_eq!(L2Key::from_matches(&m), None);

        let m = FlowMatch::new()
            .with(Match::eth_dst_masked(MAC1, MacAddr::from_const([0xff; 6])))
            .with(Match::any_vlan());
        assert_eq!(L2Key::from_matches(&m), None);

        assert_eq!(L2Key::from_matches(&FlowMatch::new()), None);
    }
}
