// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Last usable group number.
pub const GROUP_MAX: u32 = 0xffff_ff00;
/// Represents all groups in a group delete.
pub const GROUP_ALL: u32 = 0xffff_fffc;
/// Wildcard group, used as "no filter" in flow-mod and stats requests.
pub const GROUP_ANY: u32 = 0xffff_ffff;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum GroupType {
    /// Execute every bucket. Used for multicast and flooding.
    All,
    /// Execute one bucket, chosen by weight.
    Select,
    /// Execute the single bucket.
    Indirect,
    /// Execute the first live bucket.
    FastFailover,
}

impl Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::All => "ALL",
            Self::Select => "SELECT",
            Self::Indirect => "INDIRECT",
            Self::FastFailover => "FF",
        };

        write!(f, "{s}")
    }
}
