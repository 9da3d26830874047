// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Best-match lookup strategies.
//!
//! A table keeps its entries in an [`EntryList`], ordered by
//! [`OrderKey`]. The list is shared by every strategy; a strategy only
//! adds its own index on top of it to narrow down the candidates of a
//! lookup. Whatever the strategy, the entry returned for a packet is
//! the matching entry with the largest key.

use super::arena::Arena;
use super::arena::EntryHandle;
use super::flow_entry::OrderKey;
use super::flow_entry::TableEntry;
use super::packet::PacketMatches;
use crate::api::MatchingAlgorithmKind;
use core::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod l2hash;
pub mod linear;
pub mod trie;

pub use l2hash::L2Hash;
pub use linear::Linear;
pub use trie::Trie;

/// The entries of a table in lookup order.
#[derive(Debug, Default)]
pub struct EntryList {
    arena: Arena<Arc<TableEntry>>,
    order: BTreeMap<Reverse<OrderKey>, EntryHandle>,
}

impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// The handle the next inserted entry will receive.
    pub fn next_handle(&self) -> EntryHandle {
        self.arena.next_handle()
    }

    pub fn insert(&mut self, entry: Arc<TableEntry>) -> EntryHandle {
        let key = entry.key();
        let handle = self.arena.insert(entry);
        self.order.insert(Reverse(key), handle);
        handle
    }

    pub fn remove(&mut self, handle: EntryHandle) -> Option<Arc<TableEntry>> {
        let entry = self.arena.remove(handle)?;
        self.order.remove(&Reverse(entry.key()));
        Some(entry)
    }

    pub fn get(&self, handle: EntryHandle) -> Option<&Arc<TableEntry>> {
        self.arena.get(handle)
    }

    /// Entries from the highest key to the lowest.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TableEntry>> + '_ {
        self.order.values().filter_map(|h| self.arena.get(*h))
    }
}

/// A lookup strategy bound to one table.
///
/// `add` and `remove` are called with the table write lock held, right
/// after the entry was spliced into or out of the [`EntryList`].
pub trait MatchingAlgorithm: core::fmt::Debug + Send + Sync {
    fn kind(&self) -> MatchingAlgorithmKind;

    fn add(&mut self, entry: &TableEntry);

    fn remove(&mut self, entry: &TableEntry);

    /// The matching entry with the largest key, if any.
    fn find_best_match(
        &self,
        list: &EntryList,
        pkt: &PacketMatches,
    ) -> Option<EntryHandle>;

    /// Every entry whose actions reference group `group_id`.
    fn find_entries_referencing_group(
        &self,
        list: &EntryList,
        group_id: u32,
    ) -> Vec<EntryHandle> {
        list.iter()
            .filter(|e| e.instructions().has_group(group_id))
            .map(|e| e.handle())
            .collect()
    }
}

pub fn new_algorithm(kind: MatchingAlgorithmKind) -> Box<dyn MatchingAlgorithm> {
    match kind {
        MatchingAlgorithmKind::Loop => Box::new(Linear),
        MatchingAlgorithmKind::L2Hash => Box::new(L2Hash::new()),
        MatchingAlgorithmKind::Trie => Box::new(Trie::new()),
    }
}

/// Scan `candidates` in key order for the first matching entry whose key
/// beats `floor`.
pub(crate) fn scan_ordered<'a>(
    candidates: impl Iterator<Item = (&'a Reverse<OrderKey>, &'a EntryHandle)>,
    list: &EntryList,
    pkt: &PacketMatches,
    floor: Option<OrderKey>,
) -> Option<(OrderKey, EntryHandle)> {
    for (Reverse(key), handle) in candidates {
        if floor.is_some_and(|f| *key <= f) {
            return None;
        }

        if let Some(e) = list.get(*handle) {
            if e.matches().is_match(pkt) {
                return Some((*key, *handle));
            }
        }
    }

    None
}
