// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Prefix tree lookup.
//!
//! Each entry's predicates, in field order, spell a path from the
//! root; the entry hangs off the node where its path ends. Every node
//! remembers the largest key in its subtree, so a lookup descends only
//! into children whose predicate matches the packet and whose subtree
//! could still beat the best entry found so far.

use super::EntryList;
use super::MatchingAlgorithm;
use crate::api::MatchingAlgorithmKind;
use crate::engine::arena::EntryHandle;
use crate::engine::flow_entry::OrderKey;
use crate::engine::flow_entry::TableEntry;
use crate::engine::packet::PacketMatches;
use crate::engine::predicate::Match;
use core::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::HashMap;

type Best = Option<(OrderKey, EntryHandle)>;

fn beats(max: Option<OrderKey>, best: Best) -> bool {
    match (max, best) {
        (Some(m), Some((b, _))) => m > b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[derive(Debug, Default)]
struct Node {
    entries: BTreeMap<Reverse<OrderKey>, EntryHandle>,
    children: HashMap<Match, Node>,
    max: Option<OrderKey>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.children.is_empty()
    }

    fn recompute_max(&mut self) {
        let own = self.entries.keys().next().map(|Reverse(k)| *k);
        let kids = self.children.values().filter_map(|c| c.max).max();
        self.max = own.max(kids);
    }

    fn insert(&mut self, path: &[Match], key: OrderKey, handle: EntryHandle) {
        match path.split_first() {
            None => {
                self.entries.insert(Reverse(key), handle);
            }
            Some((m, rest)) => {
                self.children.entry(*m).or_default().insert(rest, key, handle)
            }
        }
        self.max = self.max.max(Some(key));
    }

    fn remove(&mut self, path: &[Match], key: OrderKey) {
        match path.split_first() {
            None => {
                self.entries.remove(&Reverse(key));
            }
            Some((m, rest)) => {
                let Some(child) = self.children.get_mut(m) else {
                    return;
                };
                child.remove(rest, key);
                if child.is_empty() {
                    self.children.remove(m);
                }
            }
        }
        self.recompute_max();
    }

    fn lookup(&self, pkt: &PacketMatches, best: &mut Best) {
        // Everything stored here matched on the way down.
        if let Some((Reverse(k), h)) = self.entries.iter().next() {
            if beats(Some(*k), *best) {
                *best = Some((*k, *h));
            }
        }

        let mut kids: Vec<&Node> = self
            .children
            .iter()
            .filter(|(m, c)| beats(c.max, *best) && m.is_match(pkt))
            .map(|(_, c)| c)
            .collect();
        kids.sort_unstable_by(|a, b| b.max.cmp(&a.max));

        for child in kids {
            if !beats(child.max, *best) {
                break;
            }
            child.lookup(pkt, best);
        }
    }

    #[cfg(test)]
    fn count_nodes(&self) -> usize {
        1 + self.children.values().map(Node::count_nodes).sum::<usize>()
    }
}

#[derive(Debug, Default)]
pub struct Trie {
    root: Node,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MatchingAlgorithm for Trie {
    fn kind(&self) -> MatchingAlgorithmKind {
        MatchingAlgorithmKind::Trie
    }

    fn add(&mut self, entry: &TableEntry) {
        self.root.insert(
            entry.matches().as_slice(),
            entry.key(),
            entry.handle(),
        );
    }

    fn remove(&mut self, entry: &TableEntry) {
        self.root.remove(entry.matches().as_slice(), entry.key());
    }

    fn find_best_match(
        &self,
        _list: &EntryList,
        pkt: &PacketMatches,
    ) -> Option<EntryHandle> {
        let mut best = None;
        self.root.lookup(pkt, &mut best);
        best.map(|(_, h)| h)
    }
}
