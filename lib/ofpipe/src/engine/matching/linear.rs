// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The reference strategy: walk the ordered list, first match wins.

use super::EntryList;
use super::MatchingAlgorithm;
use crate::api::MatchingAlgorithmKind;
use crate::engine::arena::EntryHandle;
use crate::engine::flow_entry::TableEntry;
use crate::engine::packet::PacketMatches;

#[derive(Debug, Default)]
pub struct Linear;

impl MatchingAlgorithm for Linear {
    fn kind(&self) -> MatchingAlgorithmKind {
        MatchingAlgorithmKind::Loop
    }

    fn add(&mut self, _entry: &TableEntry) {}

    fn remove(&mut self, _entry: &TableEntry) {}

    fn find_best_match(
        &self,
        list: &EntryList,
        pkt: &PacketMatches,
    ) -> Option<EntryHandle> {
        list.iter().find(|e| e.matches().is_match(pkt)).map(|e| e.handle())
    }
}
