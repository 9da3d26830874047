// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::str::FromStr;
use alloc::string::String;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// An Ethernet MAC address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Hash,
)]
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: Self = Self { inner: [0xff; 6] };
    pub const ZERO: Self = Self { inner: [0x00; 6] };

    pub const fn from_const(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }

    /// The address as the low 48 bits of an integer, most significant
    /// octet first, as carried in a match predicate.
    pub fn to_u64(self) -> u64 {
        self.inner.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    pub fn from_u64(val: u64) -> Self {
        let b = val.to_be_bytes();
        Self { inner: [b[2], b[3], b[4], b[5], b[6], b[7]] }
    }

    /// Is the group bit set?
    pub fn is_multicast(&self) -> bool {
        self.inner[0] & 0x01 != 0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl From<MacAddr> for u64 {
    fn from(mac: MacAddr) -> Self {
        mac.to_u64()
    }
}

impl FromStr for MacAddr {
    type Err = String;

    /// Parse six colon separated hex octets, in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut inner = [0u8; 6];
        let mut parts = s.trim().split(':');

        for octet in inner.iter_mut() {
            let part = parts.next().ok_or_else(|| format!("too few octets: {s}"))?;
            if part.is_empty() || part.len() > 2 {
                return Err(format!("bad octet {part:?} in {s}"));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("bad octet {part:?} in {s}"))?;
        }

        if parts.next().is_some() {
            return Err(format!("too many octets: {s}"));
        }

        Ok(Self { inner })
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.inner;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn u64_conversion() {
        let mac: MacAddr = "A8:40:25:00:00:63".parse().unwrap();
        assert_eq!(mac.to_u64(), 0xA840_2500_0063);
        assert_eq!(MacAddr::from_u64(0xA840_2500_0063), mac);
        assert_eq!(MacAddr::BROADCAST.to_u64(), 0xFFFF_FFFF_FFFF);
    }

    #[test]
    fn bad_strings() {
        assert!("A8:40:25:00:00".parse::<MacAddr>().is_err());
        assert!("A8:40:25:00:00:ZZ".parse::<MacAddr>().is_err());
    }
}
