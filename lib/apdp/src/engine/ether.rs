// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Outer Ethernet/IPv4 classification.
//!
//! Frames arriving on the wired side are steered by their outermost
//! headers before any 802.11 work happens: tunnel traffic (GRE/UDP) to
//! the vAP path, ARP/ICMP to the slow path, everything else out of the
//! fast path entirely.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;

pub const ETHER_ADDR_LEN: usize = 6;
pub const ETHER_HDR_LEN: usize = 14;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_GRE: u8 = 47;

pub const IPV4_HDR_LEN: usize = 20;
pub const IPV4_VERSION: u8 = 4;

/// An Ethernet header.
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct EthHdr {
    pub dst: [u8; ETHER_ADDR_LEN],
    pub src: [u8; ETHER_ADDR_LEN],
    pub ethertype: U16,
}

/// A fixed-size IPv4 header view, enough to classify the payload.
/// Options are never inspected.
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct Ipv4Hdr {
    pub ver_ihl: u8,
    pub tos: u8,
    pub total_len: U16,
    pub ident: U16,
    pub flags_frag: U16,
    pub ttl: u8,
    pub protocol: u8,
    pub cksum: U16,
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4Hdr {
    #[inline]
    pub fn version(&self) -> u8 {
        self.ver_ihl >> 4
    }

    /// Header length in bytes, from the IHL nibble.
    #[inline]
    pub fn header_len(&self) -> usize {
        usize::from(self.ver_ihl & 0x0F) * 4
    }
}

/// The outermost classification of a wired-side frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OuterType {
    Gre,
    Udp,
    Icmp,
    Arp,
    OtherIp,
    /// The end-of-classification sentinel: null, truncated, or a
    /// non-IP, non-ARP ether-type.
    Delimiter,
}

/// Classify a frame by its outer Ethernet/IPv4 headers.
///
/// Pure inspection; never fails destructively. Anything that cannot
/// be read yields [`OuterType::Delimiter`].
pub fn classify_outer(bytes: &[u8]) -> OuterType {
    let Ok((eth, rest)) = EthHdr::ref_from_prefix(bytes) else {
        return OuterType::Delimiter;
    };

    match eth.ethertype.get() {
        ETHER_TYPE_ARP => OuterType::Arp,
        ETHER_TYPE_IPV4 => {
            let Ok((ip, _)) = Ipv4Hdr::ref_from_prefix(rest) else {
                return OuterType::Delimiter;
            };

            if ip.version() != IPV4_VERSION || ip.header_len() < IPV4_HDR_LEN {
                return OuterType::Delimiter;
            }

            match ip.protocol {
                IPPROTO_GRE => OuterType::Gre,
                IPPROTO_UDP => OuterType::Udp,
                IPPROTO_ICMP => OuterType::Icmp,
                _ => OuterType::OtherIp,
            }
        }
        _ => OuterType::Delimiter,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn eth_ipv4(proto: u8) -> Vec<u8> {
        #[rustfmt::skip]
        let mut frame = vec![
            // destination
            0xA8, 0x40, 0x25, 0xFF, 0x77, 0x77,
            // source
            0xA8, 0x40, 0x25, 0xFA, 0xFA, 0x37,
            // ether type
            0x08, 0x00,
            // ver/ihl, tos
            0x45, 0x00,
            // total len
            0x00, 0x14,
            // ident
            0x00, 0x00,
            // flags/frag
            0x00, 0x00,
            // ttl, proto
            0x40, 0x00,
            // cksum
            0x00, 0x00,
            // source
            0x0A, 0x00, 0x00, 0x01,
            // destination
            0x0A, 0x00, 0x00, 0x02,
        ];
        frame[23] = proto;
        frame
    }

    #[test]
    fn classify() {
        assert_eq!(classify_outer(&eth_ipv4(IPPROTO_GRE)), OuterType::Gre);
        assert_eq!(classify_outer(&eth_ipv4(IPPROTO_UDP)), OuterType::Udp);
        assert_eq!(classify_outer(&eth_ipv4(IPPROTO_ICMP)), OuterType::Icmp);
        assert_eq!(classify_outer(&eth_ipv4(6)), OuterType::OtherIp);

        let mut arp = eth_ipv4(0);
        arp[12] = 0x08;
        arp[13] = 0x06;
        assert_eq!(classify_outer(&arp), OuterType::Arp);
    }

    #[test]
    fn malformed_is_delimiter() {
        assert_eq!(classify_outer(&[]), OuterType::Delimiter);
        assert_eq!(classify_outer(&[0; 13]), OuterType::Delimiter);

        // IPv6 ether-type is not handled on the fast path.
        let mut v6 = eth_ipv4(0);
        v6[12] = 0x86;
        v6[13] = 0xDD;
        assert_eq!(classify_outer(&v6), OuterType::Delimiter);

        // A truncated IPv4 header cannot be classified.
        let short = &eth_ipv4(IPPROTO_UDP)[..20];
        assert_eq!(classify_outer(short), OuterType::Delimiter);

        // Garbage in the version nibble.
        let mut bad_ver = eth_ipv4(IPPROTO_UDP);
        bad_ver[14] = 0x65;
        assert_eq!(classify_outer(&bad_ver), OuterType::Delimiter);

        // An IHL shorter than the fixed header.
        let mut bad_ihl = eth_ipv4(IPPROTO_UDP);
        bad_ihl[14] = 0x44;
        assert_eq!(classify_outer(&bad_ihl), OuterType::Delimiter);
    }
}
