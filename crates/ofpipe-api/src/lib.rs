// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;
pub mod config;
pub mod field;
pub mod group;
pub mod mac;
pub mod stat;

pub use cmd::*;
pub use config::*;
pub use field::*;
pub use group::*;
pub use mac::*;
pub use stat::*;

/// Output to the port the packet arrived on.
pub const PORT_IN_PORT: u32 = 0xffff_fff8;
/// Submit the packet to the first flow table. Only valid in packet-out.
pub const PORT_TABLE: u32 = 0xffff_fff9;
pub const PORT_NORMAL: u32 = 0xffff_fffa;
pub const PORT_FLOOD: u32 = 0xffff_fffb;
pub const PORT_ALL: u32 = 0xffff_fffc;
pub const PORT_CONTROLLER: u32 = 0xffff_fffd;
pub const PORT_LOCAL: u32 = 0xffff_fffe;
/// Wildcard port, used as "no filter" in flow-mod and stats requests.
pub const PORT_ANY: u32 = 0xffff_ffff;
/// Highest number usable for a physical or logical port.
pub const PORT_MAX: u32 = 0xffff_ff00;

/// Address every table in a stats request or flow-mod.
pub const TABLE_ALL: u8 = 0xff;

/// Legacy OpenFlow 1.0 flag marking an entry without wildcards. Such
/// entries always take precedence over wildcarded ones.
pub const OF10_NON_WILDCARDED_PRIORITY_FLAG: u32 = 0x1_0000;

/// Default number of bytes of a packet sent to the controller.
pub const DEFAULT_MISS_SEND_LEN: u16 = 128;

/// The OpenFlow protocol version the pipeline enforces.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum OfVersion {
    V10,
    V12,
    #[default]
    V13,
}

impl core::str::FromStr for OfVersion {
    type Err = alloc::string::String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s {
            "1.0" | "v10" | "V10" => Ok(Self::V10),
            "1.2" | "v12" | "V12" => Ok(Self::V12),
            "1.3" | "v13" | "V13" => Ok(Self::V13),
            _ => Err(format!("invalid OpenFlow version: {s}")),
        }
    }
}

impl Display for OfVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::V10 => "1.0",
            Self::V12 => "1.2",
            Self::V13 => "1.3",
        })
    }
}

/// Why a flow entry left its table.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum RemovalReason {
    IdleTimeout,
    HardTimeout,
    Delete,
    GroupDelete,
}

impl Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::IdleTimeout => "IDLE_TIMEOUT",
            Self::HardTimeout => "HARD_TIMEOUT",
            Self::Delete => "DELETE",
            Self::GroupDelete => "GROUP_DELETE",
        };

        write!(f, "{s}")
    }
}

/// Why a packet is being handed to the controller.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum PacketInReason {
    NoMatch,
    ExplicitAction,
    InvalidTtl,
}

impl Display for PacketInReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::NoMatch => "NO_MATCH",
            Self::ExplicitAction => "ACTION",
            Self::InvalidTtl => "INVALID_TTL",
        };

        write!(f, "{s}")
    }
}

/// What a table does with a packet that matches none of its entries.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum MissAction {
    Drop,
    /// Move on to the next table; dropped when there is none.
    Continue,
    #[default]
    ToController,
}

impl Display for MissAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Drop => "DROP",
            Self::Continue => "CONTINUE",
            Self::ToController => "CONTROLLER",
        };

        write!(f, "{s}")
    }
}

/// The identity handed to the platform hooks along with each event.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SwitchId {
    pub dpid: u64,
    pub name: alloc::string::String,
}

impl Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:#018x})", self.name, self.dpid)
    }
}
