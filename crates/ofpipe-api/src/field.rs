// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Identifiers for the packet fields a flow entry may match on.

use super::OfVersion;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The present bit of an OpenFlow VLAN_VID value. A tagged packet
/// carries `VLAN_PRESENT | vid`, an untagged one carries zero.
pub const VLAN_PRESENT: u16 = 0x1000;

/// A packet field which can be the subject of a match predicate.
///
/// The discriminant doubles as the field's bit in capability bitmaps
/// and as its position on a canonical predicate path, so the order of
/// the variants is significant.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[repr(u8)]
pub enum MatchField {
    InPort = 0,
    InPhyPort,
    Metadata,

    EthDst,
    EthSrc,
    EthType,
    VlanVid,
    VlanPcp,

    MplsLabel,
    MplsTc,
    MplsBos,

    ArpOp,
    ArpSpa,
    ArpTpa,
    ArpSha,
    ArpTha,

    /// IP protocol or ARP opcode. OpenFlow 1.0 only.
    NwProto,
    /// IPv4 or ARP source address. OpenFlow 1.0 only.
    NwSrc,
    /// IPv4 or ARP target address. OpenFlow 1.0 only.
    NwDst,

    IpDscp,
    IpEcn,
    IpProto,
    Ipv4Src,
    Ipv4Dst,

    Ipv6Src,
    Ipv6Dst,
    Ipv6Flabel,
    Icmpv6Type,
    Icmpv6Code,
    Ipv6NdTarget,
    Ipv6NdSll,
    Ipv6NdTll,
    Ipv6Exthdr,

    /// TCP/UDP source port or ICMP type. OpenFlow 1.0 only.
    TpSrc,
    /// TCP/UDP destination port or ICMP code. OpenFlow 1.0 only.
    TpDst,
    TcpSrc,
    TcpDst,
    UdpSrc,
    UdpDst,
    SctpSrc,
    SctpDst,
    Icmpv4Type,
    Icmpv4Code,

    PbbIsid,
    TunnelId,
}

impl MatchField {
    pub const ALL: [MatchField; 45] = [
        Self::InPort,
        Self::InPhyPort,
        Self::Metadata,
        Self::EthDst,
        Self::EthSrc,
        Self::EthType,
        Self::VlanVid,
        Self::VlanPcp,
        Self::MplsLabel,
        Self::MplsTc,
        Self::MplsBos,
        Self::ArpOp,
        Self::ArpSpa,
        Self::ArpTpa,
        Self::ArpSha,
        Self::ArpTha,
        Self::NwProto,
        Self::NwSrc,
        Self::NwDst,
        Self::IpDscp,
        Self::IpEcn,
        Self::IpProto,
        Self::Ipv4Src,
        Self::Ipv4Dst,
        Self::Ipv6Src,
        Self::Ipv6Dst,
        Self::Ipv6Flabel,
        Self::Icmpv6Type,
        Self::Icmpv6Code,
        Self::Ipv6NdTarget,
        Self::Ipv6NdSll,
        Self::Ipv6NdTll,
        Self::Ipv6Exthdr,
        Self::TpSrc,
        Self::TpDst,
        Self::TcpSrc,
        Self::TcpDst,
        Self::UdpSrc,
        Self::UdpDst,
        Self::SctpSrc,
        Self::SctpDst,
        Self::Icmpv4Type,
        Self::Icmpv4Code,
        Self::PbbIsid,
        Self::TunnelId,
    ];

    /// The fields of the OpenFlow 1.0 twelve-tuple.
    pub const OF10: [MatchField; 12] = [
        Self::InPort,
        Self::EthDst,
        Self::EthSrc,
        Self::EthType,
        Self::VlanVid,
        Self::VlanPcp,
        Self::IpDscp,
        Self::NwProto,
        Self::NwSrc,
        Self::NwDst,
        Self::TpSrc,
        Self::TpDst,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    /// The width of the field in bits.
    pub fn bits(self) -> u32 {
        use MatchField::*;

        match self {
            InPort | InPhyPort => 32,
            Metadata | TunnelId => 64,
            EthDst | EthSrc | ArpSha | ArpTha | Ipv6NdSll | Ipv6NdTll => 48,
            EthType | ArpOp => 16,
            // VID plus the present bit.
            VlanVid => 13,
            VlanPcp | MplsTc => 3,
            MplsLabel | Ipv6Flabel => 20,
            MplsBos => 1,
            ArpSpa | ArpTpa | NwSrc | NwDst | Ipv4Src | Ipv4Dst => 32,
            NwProto | IpProto => 8,
            IpDscp => 6,
            IpEcn => 2,
            Ipv6Src | Ipv6Dst | Ipv6NdTarget => 128,
            Icmpv6Type | Icmpv6Code | Icmpv4Type | Icmpv4Code => 8,
            Ipv6Exthdr => 9,
            TpSrc | TpDst | TcpSrc | TcpDst | UdpSrc | UdpDst | SctpSrc
            | SctpDst => 16,
            PbbIsid => 24,
        }
    }

    /// The all-ones mask for this field.
    pub fn full_mask(self) -> u128 {
        match self.bits() {
            128 => u128::MAX,
            n => (1u128 << n) - 1,
        }
    }

    /// Is this field only meaningful in OpenFlow 1.0?
    pub fn is_of10_only(self) -> bool {
        matches!(
            self,
            Self::NwProto | Self::NwSrc | Self::NwDst | Self::TpSrc | Self::TpDst
        )
    }

    /// The oldest protocol version able to express this field.
    pub fn min_version(self) -> OfVersion {
        use MatchField::*;

        if Self::OF10.contains(&self) {
            return OfVersion::V10;
        }

        match self {
            MplsBos | PbbIsid | TunnelId | Ipv6Exthdr => OfVersion::V13,
            _ => OfVersion::V12,
        }
    }

    /// Can a flow entry of the given version use this field?
    pub fn supported_by(self, version: OfVersion) -> bool {
        if self.is_of10_only() {
            return version == OfVersion::V10;
        }

        self.min_version() <= version
    }

    pub fn name(self) -> &'static str {
        use MatchField::*;

        match self {
            InPort => "IN_PORT",
            InPhyPort => "IN_PHY_PORT",
            Metadata => "METADATA",
            EthDst => "ETH_DST",
            EthSrc => "ETH_SRC",
            EthType => "ETH_TYPE",
            VlanVid => "VLAN_VID",
            VlanPcp => "VLAN_PCP",
            MplsLabel => "MPLS_LABEL",
            MplsTc => "MPLS_TC",
            MplsBos => "MPLS_BOS",
            ArpOp => "ARP_OP",
            ArpSpa => "ARP_SPA",
            ArpTpa => "ARP_TPA",
            ArpSha => "ARP_SHA",
            ArpTha => "ARP_THA",
            NwProto => "NW_PROTO",
            NwSrc => "NW_SRC",
            NwDst => "NW_DST",
            IpDscp => "IP_DSCP",
            IpEcn => "IP_ECN",
            IpProto => "IP_PROTO",
            Ipv4Src => "IPV4_SRC",
            Ipv4Dst => "IPV4_DST",
            Ipv6Src => "IPV6_SRC",
            Ipv6Dst => "IPV6_DST",
            Ipv6Flabel => "IPV6_FLABEL",
            Icmpv6Type => "ICMPV6_TYPE",
            Icmpv6Code => "ICMPV6_CODE",
            Ipv6NdTarget => "IPV6_ND_TARGET",
            Ipv6NdSll => "IPV6_ND_SLL",
            Ipv6NdTll => "IPV6_ND_TLL",
            Ipv6Exthdr => "IPV6_EXTHDR",
            TpSrc => "TP_SRC",
            TpDst => "TP_DST",
            TcpSrc => "TCP_SRC",
            TcpDst => "TCP_DST",
            UdpSrc => "UDP_SRC",
            UdpDst => "UDP_DST",
            SctpSrc => "SCTP_SRC",
            SctpDst => "SCTP_DST",
            Icmpv4Type => "ICMPV4_TYPE",
            Icmpv4Code => "ICMPV4_CODE",
            PbbIsid => "PBB_ISID",
            TunnelId => "TUNNEL_ID",
        }
    }
}

impl Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn all_is_in_discriminant_order() {
        for (i, f) in MatchField::ALL.iter().enumerate() {
            assert_eq!(usize::from(f.index()), i, "{f}");
        }
    }

    #[test]
    fn version_gating() {
        assert!(MatchField::TpSrc.supported_by(OfVersion::V10));
        assert!(!MatchField::TpSrc.supported_by(OfVersion::V13));
        assert!(!MatchField::TcpSrc.supported_by(OfVersion::V10));
        assert!(MatchField::TcpSrc.supported_by(OfVersion::V12));
        assert!(!MatchField::MplsBos.supported_by(OfVersion::V12));
        assert!(MatchField::MplsBos.supported_by(OfVersion::V13));
        assert!(MatchField::EthDst.supported_by(OfVersion::V10));
    }

    #[test]
    fn masks() {
        assert_eq!(MatchField::VlanVid.full_mask(), 0x1fff);
        assert_eq!(MatchField::EthDst.full_mask(), 0xffff_ffff_ffff);
        assert_eq!(MatchField::Ipv6Src.full_mask(), u128::MAX);
    }
}
