// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The parsed view of a packet the pipeline operates on.
//!
//! Parsing the wire format is the job of the embedder. The engine only
//! ever sees the header fields in [`PacketMatches`] and mutates them
//! as actions dictate.

use super::action::ActionSet;
use crate::api::MacAddr;
use crate::api::MatchField;
use crate::api::VLAN_PRESENT;
use core::hash::Hash;
use crc32fast::Hasher;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;
pub const ETHER_TYPE_MPLS: u16 = 0x8847;
pub const ETHER_TYPE_PBB: u16 = 0x88E7;

pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;
pub const IP_PROTO_ICMPV6: u8 = 58;
pub const IP_PROTO_SCTP: u8 = 132;

/// A single 802.1Q tag.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Vlan {
    pub vid: u16,
    pub pcp: u8,
}

/// The outermost MPLS label stack entry.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Mpls {
    pub label: u32,
    pub tc: u8,
    pub bos: bool,
    pub ttl: u8,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Arp {
    pub op: u16,
    pub spa: Ipv4Addr,
    pub tpa: Ipv4Addr,
    pub sha: MacAddr,
    pub tha: MacAddr,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IpAddrs {
    V4 { src: Ipv4Addr, dst: Ipv4Addr },
    V6 { src: Ipv6Addr, dst: Ipv6Addr, flabel: u32, exthdr: u16 },
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ip {
    pub dscp: u8,
    pub ecn: u8,
    pub proto: u8,
    pub ttl: u8,
    pub addrs: IpAddrs,
}

/// Neighbor discovery fields of an ICMPv6 NS/NA message.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Nd {
    pub target: Ipv6Addr,
    pub sll: Option<MacAddr>,
    pub tll: Option<MacAddr>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum L4 {
    Tcp { src: u16, dst: u16 },
    Udp { src: u16, dst: u16 },
    Sctp { src: u16, dst: u16 },
    Icmpv4 { ty: u8, code: u8 },
    Icmpv6 { ty: u8, code: u8, nd: Option<Nd> },
}

/// The header fields of a packet that flow entries can match on.
///
/// Headers the packet does not carry are `None`, and every field
/// living in such a header is absent for matching purposes.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PacketMatches {
    pub in_port: u32,
    pub in_phy_port: u32,
    pub metadata: u64,

    pub eth_dst: MacAddr,
    pub eth_src: MacAddr,
    /// The ethertype of the payload, after any tags.
    pub eth_type: u16,
    pub vlan: Option<Vlan>,
    pub mpls: Option<Mpls>,
    pub pbb_isid: Option<u32>,
    pub tunnel_id: Option<u64>,

    pub arp: Option<Arp>,
    pub ip: Option<Ip>,
    pub l4: Option<L4>,
}

impl PacketMatches {
    /// The value of `field` in the encoding used by match predicates.
    pub fn get(&self, field: MatchField) -> Option<u128> {
        use MatchField::*;

        let ip = self.ip.as_ref();
        let v = match field {
            InPort => u128::from(self.in_port),
            InPhyPort => u128::from(self.in_phy_port),
            Metadata => u128::from(self.metadata),

            EthDst => u128::from(self.eth_dst.to_u64()),
            EthSrc => u128::from(self.eth_src.to_u64()),
            EthType => u128::from(self.eth_type),
            // Always present: an untagged packet carries zero.
            VlanVid => match self.vlan {
                Some(v) => u128::from(VLAN_PRESENT | (v.vid & 0x0fff)),
                None => 0,
            },
            VlanPcp => u128::from(self.vlan?.pcp),

            MplsLabel => u128::from(self.mpls?.label),
            MplsTc => u128::from(self.mpls?.tc),
            MplsBos => u128::from(self.mpls?.bos),
            PbbIsid => u128::from(self.pbb_isid?),
            TunnelId => u128::from(self.tunnel_id?),

            ArpOp => u128::from(self.arp?.op),
            ArpSpa => u128::from(u32::from(self.arp?.spa)),
            ArpTpa => u128::from(u32::from(self.arp?.tpa)),
            ArpSha => u128::from(self.arp?.sha.to_u64()),
            ArpTha => u128::from(self.arp?.tha.to_u64()),

            NwProto => match (ip, self.arp) {
                (Some(ip), _) => u128::from(ip.proto),
                (None, Some(arp)) => u128::from(arp.op & 0xff),
                (None, None) => return None,
            },
            NwSrc => match (ip.map(|ip| ip.addrs), self.arp) {
                (Some(IpAddrs::V4 { src, .. }), _) => u128::from(u32::from(src)),
                (None, Some(arp)) => u128::from(u32::from(arp.spa)),
                _ => return None,
            },
            NwDst => match (ip.map(|ip| ip.addrs), self.arp) {
                (Some(IpAddrs::V4 { dst, .. }), _) => u128::from(u32::from(dst)),
                (None, Some(arp)) => u128::from(u32::from(arp.tpa)),
                _ => return None,
            },

            IpDscp => u128::from(ip?.dscp),
            IpEcn => u128::from(ip?.ecn),
            IpProto => u128::from(ip?.proto),
            Ipv4Src => match ip?.addrs {
                IpAddrs::V4 { src, .. } => u128::from(u32::from(src)),
                IpAddrs::V6 { .. } => return None,
            },
            Ipv4Dst => match ip?.addrs {
                IpAddrs::V4 { dst, .. } => u128::from(u32::from(dst)),
                IpAddrs::V6 { .. } => return None,
            },
            Ipv6Src => match ip?.addrs {
                IpAddrs::V6 { src, .. } => u128::from(src),
                IpAddrs::V4 { .. } => return None,
            },
            Ipv6Dst => match ip?.addrs {
                IpAddrs::V6 { dst, .. } => u128::from(dst),
                IpAddrs::V4 { .. } => return None,
            },
            Ipv6Flabel => match ip?.addrs {
                IpAddrs::V6 { flabel, .. } => u128::from(flabel),
                IpAddrs::V4 { .. } => return None,
            },
            Ipv6Exthdr => match ip?.addrs {
                IpAddrs::V6 { exthdr, .. } => u128::from(exthdr),
                IpAddrs::V4 { .. } => return None,
            },

            TpSrc => match self.l4? {
                L4::Tcp { src, .. } | L4::Udp { src, .. } => u128::from(src),
                L4::Icmpv4 { ty, .. } => u128::from(ty),
                _ => return None,
            },
            TpDst => match self.l4? {
                L4::Tcp { dst, .. } | L4::Udp { dst, .. } => u128::from(dst),
                L4::Icmpv4 { code, .. } => u128::from(code),
                _ => return None,
            },
            TcpSrc => match self.l4? {
                L4::Tcp { src, .. } => u128::from(src),
                _ => return None,
            },
            TcpDst => match self.l4? {
                L4::Tcp { dst, .. } => u128::from(dst),
                _ => return None,
            },
            UdpSrc => match self.l4? {
                L4::Udp { src, .. } => u128::from(src),
                _ => return None,
            },
            UdpDst => match self.l4? {
                L4::Udp { dst, .. } => u128::from(dst),
                _ => return None,
            },
            SctpSrc => match self.l4? {
                L4::Sctp { src, .. } => u128::from(src),
                _ => return None,
            },
            SctpDst => match self.l4? {
                L4::Sctp { dst, .. } => u128::from(dst),
                _ => return None,
            },
            Icmpv4Type => match self.l4? {
                L4::Icmpv4 { ty, .. } => u128::from(ty),
                _ => return None,
            },
            Icmpv4Code => match self.l4? {
                L4::Icmpv4 { code, .. } => u128::from(code),
                _ => return None,
            },
            Icmpv6Type => match self.l4? {
                L4::Icmpv6 { ty, .. } => u128::from(ty),
                _ => return None,
            },
            Icmpv6Code => match self.l4? {
                L4::Icmpv6 { code, .. } => u128::from(code),
                _ => return None,
            },
            Ipv6NdTarget => match self.l4? {
                L4::Icmpv6 { nd: Some(nd), .. } => u128::from(nd.target),
                _ => return None,
            },
            Ipv6NdSll => match self.l4? {
                L4::Icmpv6 { nd: Some(Nd { sll: Some(mac), .. }), .. } => {
                    u128::from(mac.to_u64())
                }
                _ => return None,
            },
            Ipv6NdTll => match self.l4? {
                L4::Icmpv6 { nd: Some(Nd { tll: Some(mac), .. }), .. } => {
                    u128::from(mac.to_u64())
                }
                _ => return None,
            },
        };

        Some(v)
    }

    /// Overwrite `field` with `val`, as a set-field action does.
    ///
    /// Writing a field whose header the packet lacks is a no-op; the
    /// return value says whether anything was written.
    pub fn set(&mut self, field: MatchField, val: u128) -> bool {
        use MatchField::*;

        // The value has been truncated to the field width by the
        // caller, so the narrowing casts below cannot lose bits.
        let val = val & field.full_mask();
        match field {
            InPort => self.in_port = val as u32,
            InPhyPort => self.in_phy_port = val as u32,
            Metadata => self.metadata = val as u64,
            EthDst => self.eth_dst = MacAddr::from_u64(val as u64),
            EthSrc => self.eth_src = MacAddr::from_u64(val as u64),
            EthType => self.eth_type = val as u16,
            VlanVid => match self.vlan.as_mut() {
                Some(v) => v.vid = (val as u16) & 0x0fff,
                None => return false,
            },
            VlanPcp => match self.vlan.as_mut() {
                Some(v) => v.pcp = val as u8,
                None => return false,
            },
            MplsLabel => match self.mpls.as_mut() {
                Some(m) => m.label = val as u32,
                None => return false,
            },
            MplsTc => match self.mpls.as_mut() {
                Some(m) => m.tc = val as u8,
                None => return false,
            },
            MplsBos => match self.mpls.as_mut() {
                Some(m) => m.bos = val != 0,
                None => return false,
            },
            PbbIsid => match self.pbb_isid.as_mut() {
                Some(isid) => *isid = val as u32,
                None => return false,
            },
            TunnelId => self.tunnel_id = Some(val as u64),
            ArpOp | ArpSpa | ArpTpa | ArpSha | ArpTha => {
                let Some(arp) = self.arp.as_mut() else {
                    return false;
                };
                match field {
                    ArpOp => arp.op = val as u16,
                    ArpSpa => arp.spa = Ipv4Addr::from(val as u32),
                    ArpTpa => arp.tpa = Ipv4Addr::from(val as u32),
                    ArpSha => arp.sha = MacAddr::from_u64(val as u64),
                    _ => arp.tha = MacAddr::from_u64(val as u64),
                }
            }
            NwProto => match (self.ip.as_mut(), self.arp.as_mut()) {
                (Some(ip), _) => ip.proto = val as u8,
                (None, Some(arp)) => arp.op = val as u16,
                (None, None) => return false,
            },
            NwSrc | Ipv4Src => {
                if let Some(IpAddrs::V4 { src, .. }) =
                    self.ip.as_mut().map(|ip| &mut ip.addrs)
                {
                    *src = Ipv4Addr::from(val as u32);
                } else if field == NwSrc && self.arp.is_some() {
                    return self.set(ArpSpa, val);
                } else {
                    return false;
                }
            }
            NwDst | Ipv4Dst => {
                if let Some(IpAddrs::V4 { dst, .. }) =
                    self.ip.as_mut().map(|ip| &mut ip.addrs)
                {
                    *dst = Ipv4Addr::from(val as u32);
                } else if field == NwDst && self.arp.is_some() {
                    return self.set(ArpTpa, val);
                } else {
                    return false;
                }
            }
            IpDscp | IpEcn | IpProto => {
                let Some(ip) = self.ip.as_mut() else {
                    return false;
                };
                match field {
                    IpDscp => ip.dscp = val as u8,
                    IpEcn => ip.ecn = val as u8,
                    _ => ip.proto = val as u8,
                }
            }
            Ipv6Src | Ipv6Dst | Ipv6Flabel | Ipv6Exthdr => {
                let Some(IpAddrs::V6 { src, dst, flabel, exthdr }) =
                    self.ip.as_mut().map(|ip| &mut ip.addrs)
                else {
                    return false;
                };
                match field {
                    Ipv6Src => *src = Ipv6Addr::from(val),
                    Ipv6Dst => *dst = Ipv6Addr::from(val),
                    Ipv6Flabel => *flabel = val as u32,
                    _ => *exthdr = val as u16,
                }
            }
            TpSrc | TpDst | TcpSrc | TcpDst | UdpSrc | UdpDst | SctpSrc
            | SctpDst | Icmpv4Type | Icmpv4Code | Icmpv6Type | Icmpv6Code
            | Ipv6NdTarget | Ipv6NdSll | Ipv6NdTll => {
                return self.set_l4(field, val);
            }
        }

        true
    }

    fn set_l4(&mut self, field: MatchField, val: u128) -> bool {
        use MatchField::*;

        let Some(l4) = self.l4.as_mut() else {
            return false;
        };

        match (field, l4) {
            (TpSrc | TcpSrc, L4::Tcp { src, .. })
            | (TpSrc | UdpSrc, L4::Udp { src, .. })
            | (SctpSrc, L4::Sctp { src, .. }) => *src = val as u16,
            (TpDst | TcpDst, L4::Tcp { dst, .. })
            | (TpDst | UdpDst, L4::Udp { dst, .. })
            | (SctpDst, L4::Sctp { dst, .. }) => *dst = val as u16,
            (TpSrc | Icmpv4Type, L4::Icmpv4 { ty, .. })
            | (Icmpv6Type, L4::Icmpv6 { ty, .. }) => *ty = val as u8,
            (TpDst | Icmpv4Code, L4::Icmpv4 { code, .. })
            | (Icmpv6Code, L4::Icmpv6 { code, .. }) => *code = val as u8,
            (Ipv6NdTarget, L4::Icmpv6 { nd: Some(nd), .. }) => {
                nd.target = Ipv6Addr::from(val)
            }
            (Ipv6NdSll, L4::Icmpv6 { nd: Some(nd), .. }) => {
                nd.sll = Some(MacAddr::from_u64(val as u64))
            }
            (Ipv6NdTll, L4::Icmpv6 { nd: Some(nd), .. }) => {
                nd.tll = Some(MacAddr::from_u64(val as u64))
            }
            _ => return false,
        }

        true
    }

    /// A hash of the fields identifying the flow this packet belongs
    /// to. Packets of one flow always hash alike.
    pub fn flow_hash(&self) -> u32 {
        let mut hasher = Hasher::new();
        for field in FLOW_HASH_FIELDS {
            self.get(field).hash(&mut hasher);
        }
        hasher.finalize()
    }
}

const FLOW_HASH_FIELDS: [MatchField; 13] = [
    MatchField::EthDst,
    MatchField::EthSrc,
    MatchField::EthType,
    MatchField::VlanVid,
    MatchField::IpProto,
    MatchField::Ipv4Src,
    MatchField::Ipv4Dst,
    MatchField::Ipv6Src,
    MatchField::Ipv6Dst,
    MatchField::TcpSrc,
    MatchField::TcpDst,
    MatchField::UdpSrc,
    MatchField::UdpDst,
];

/// A packet moving through the pipeline.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub matches: PacketMatches,
    /// Length of the frame on the wire, used for byte counters.
    pub len: u32,
    /// The frame itself. Opaque to the engine, handed to the
    /// platform on output and packet-in.
    pub data: Vec<u8>,
    /// The action set accumulated by write-actions instructions.
    pub action_set: ActionSet,
}

impl Packet {
    pub fn new(matches: PacketMatches, len: u32) -> Self {
        Self { matches, len, data: Vec::new(), action_set: ActionSet::new() }
    }

    pub fn with_data(matches: PacketMatches, data: Vec<u8>) -> Self {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        Self { matches, len, data, action_set: ActionSet::new() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tcp4() -> PacketMatches {
        PacketMatches {
            in_port: 3,
            eth_dst: MacAddr::from_const([0xa8, 0x40, 0x25, 0, 0, 1]),
            eth_src: MacAddr::from_const([0xa8, 0x40, 0x25, 0, 0, 2]),
            eth_type: ETHER_TYPE_IPV4,
            ip: Some(Ip {
                dscp: 0,
                ecn: 0,
                proto: IP_PROTO_TCP,
                ttl: 64,
                addrs: IpAddrs::V4 {
                    src: "10.0.0.2".parse().unwrap(),
                    dst: "10.0.0.1".parse().unwrap(),
                },
            }),
            l4: Some(L4::Tcp { src: 4000, dst: 80 }),
            ..Default::default()
        }
    }

    #[test]
    fn absent_headers() {
        let pkt = tcp4();
        assert_eq!(pkt.get(MatchField::VlanVid), Some(0));
        assert_eq!(pkt.get(MatchField::VlanPcp), None);
        assert_eq!(pkt.get(MatchField::UdpDst), None);
        assert_eq!(pkt.get(MatchField::Ipv6Src), None);
        assert_eq!(pkt.get(MatchField::MplsLabel), None);
    }

    #[test]
    fn of10_aliases() {
        let pkt = tcp4();
        assert_eq!(pkt.get(MatchField::TpDst), pkt.get(MatchField::TcpDst));
        assert_eq!(pkt.get(MatchField::NwDst), pkt.get(MatchField::Ipv4Dst));
        assert_eq!(pkt.get(MatchField::NwProto), Some(6));
    }

    #[test]
    fn set_fields() {
        let mut pkt = tcp4();
        assert!(pkt.set(MatchField::TcpDst, 8080));
        assert_eq!(pkt.get(MatchField::TcpDst), Some(8080));
        assert!(pkt.set(MatchField::Ipv4Src, 0x0a00_0063));
        assert_eq!(pkt.get(MatchField::Ipv4Src), Some(0x0a00_0063));
        assert!(!pkt.set(MatchField::VlanVid, 7));
        assert!(!pkt.set(MatchField::UdpSrc, 53));

        pkt.vlan = Some(Vlan { vid: 1, pcp: 0 });
        assert!(pkt.set(MatchField::VlanVid, 7));
        assert_eq!(pkt.get(MatchField::VlanVid), Some(0x1007));
    }
}
