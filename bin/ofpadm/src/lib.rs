// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! ofpipe administration library
//!
//! A scenario describes a pipeline, the groups and flows installed in
//! it, and a timeline of packets and timer sweeps. `ofpadm` replays it
//! against an in-process pipeline.

pub mod hooks;
pub mod scenario;

pub use hooks::LogHooks;
pub use scenario::Report;
pub use scenario::Scenario;
pub use scenario::ScenarioError;
