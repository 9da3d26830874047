// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow-table pipeline.
pub mod action;
pub mod arena;
pub mod flow_entry;
pub mod flow_table;
pub mod group_table;
pub mod instruction;
pub mod matching;
pub mod packet;
pub mod pipeline;
pub mod predicate;
pub mod stat;
pub mod timer;
