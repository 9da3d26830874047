// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The datapath decision engine of an OpenFlow 1.0 - 1.3 switch.
//!
//! A [`engine::pipeline::Pipeline`] holds an ordered array of flow
//! tables and a group table. Every packet handed to it is matched
//! against the tables in turn, the instructions of the best matching
//! entry are run, and the resulting outputs, drops, and controller
//! notifications are delivered through the
//! [`provider::PlatformHooks`] injected at construction.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod api;
pub mod ddi;
pub mod engine;
#[cfg(feature = "std")]
pub mod print;
pub mod provider;

/// Return value with `bit` set.
pub const fn bit_on(bit: u8) -> u128 {
    0x1 << bit
}
