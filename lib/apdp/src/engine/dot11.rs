// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! IEEE 802.11 frame classification and conversion.
//!
//! The MAC header is variable length: a 4th address is present iff
//! both DS bits are set, and a QoS-control field iff the frame is a
//! QoS Data subtype. All bit-packed wire fields (frame control,
//! sequence control, QoS control) are read and written through the
//! mask/shift constants below rather than any native bit-field layout.

use crate::buf::BufError;
use crate::buf::PacketBuf;
use crate::engine::ccmp::CCMP_HDR_LEN;
use crate::engine::ether::ETHER_HDR_LEN;
use apdp_api::ApdpError;
use apdp_api::MacAddr;
use apdp_api::SecAssoc;
use bitflags::bitflags;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16 as BeU16;

pub const DOT11_ADDR_LEN: usize = 6;

/// The three-address header: frame control, duration, a1..a3,
/// sequence control.
pub const DOT11_HDR_LEN_MIN: usize = 24;
/// Four addresses plus QoS control.
pub const DOT11_HDR_LEN_MAX: usize = 32;

pub const DOT11_A1_OFF: usize = 4;
pub const DOT11_A2_OFF: usize = 10;
pub const DOT11_A3_OFF: usize = 16;
pub const DOT11_SEQ_CTRL_OFF: usize = 22;
pub const DOT11_A4_OFF: usize = 24;

pub const QOS_CTRL_LEN: usize = 2;

// Frame control, a little-endian u16.
pub const FC_TYPE_MASK: u16 = 0x000C;
pub const FC_TYPE_SHIFT: u16 = 2;
pub const FC_SUBTYPE_MASK: u16 = 0x00F0;
pub const FC_SUBTYPE_SHIFT: u16 = 4;
pub const FC_TO_DS: u16 = 0x0100;
pub const FC_FROM_DS: u16 = 0x0200;
pub const FC_MORE_FRAG: u16 = 0x0400;
pub const FC_RETRY: u16 = 0x0800;
pub const FC_PWR_MGMT: u16 = 0x1000;
pub const FC_MORE_DATA: u16 = 0x2000;
pub const FC_PROTECTED: u16 = 0x4000;
pub const FC_ORDER: u16 = 0x8000;

pub const FRAME_TYPE_DATA: u16 = 2;
/// Subtype bit 3 distinguishes the QoS Data subtypes.
pub const DATA_SUBTYPE_QOS: u16 = 0x8;

// Sequence control, a little-endian u16.
pub const SC_FRAG_MASK: u16 = 0x000F;
pub const SC_SEQ_MASK: u16 = 0xFFF0;

// QoS control, a little-endian u16.
pub const QC_TID_MASK: u16 = 0x000F;

// 802.2 LLC/SNAP.
pub const LLC_SNAP_LEN: usize = 8;
pub const LLC_SAP_SNAP: u8 = 0xAA;
pub const LLC_CTRL_UI: u8 = 0x03;

pub const ETHER_TYPE_EAPOL: u16 = 0x888E;

#[inline]
pub fn fc_frame_type(fc: u16) -> u16 {
    (fc & FC_TYPE_MASK) >> FC_TYPE_SHIFT
}

#[inline]
pub fn fc_subtype(fc: u16) -> u16 {
    (fc & FC_SUBTYPE_MASK) >> FC_SUBTYPE_SHIFT
}

#[inline]
pub fn fc_is_data(fc: u16) -> bool {
    fc_frame_type(fc) == FRAME_TYPE_DATA
}

#[inline]
pub fn fc_is_qos_data(fc: u16) -> bool {
    fc_is_data(fc) && (fc_subtype(fc) & DATA_SUBTYPE_QOS) != 0
}

#[inline]
fn read_u16_le(bytes: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

#[inline]
fn write_u16_le(bytes: &mut [u8], off: usize, val: u16) {
    bytes[off..off + 2].copy_from_slice(&val.to_le_bytes());
}

/// The 802.2 LLC header plus SNAP extension, as found at the head of a
/// Data frame body. Built by the 802.2 layer; this crate only reads
/// it.
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct LlcSnapHdr {
    pub dsap: u8,
    pub ssap: u8,
    pub ctrl: u8,
    pub oui: [u8; 3],
    pub ethertype: BeU16,
}

impl LlcSnapHdr {
    #[inline]
    pub fn is_snap(&self) -> bool {
        self.dsap == LLC_SAP_SNAP
            && self.ssap == LLC_SAP_SNAP
            && self.ctrl == LLC_CTRL_UI
    }
}

bitflags! {
    /// Per-frame facts carried in [`FrameMeta`].
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct FrameFlags: u8 {
        /// Both DS bits set: a 4th address is present.
        const HAS_A4 = 1 << 0;
        /// QoS Data subtype: a QoS-control field is present.
        const HAS_QOS = 1 << 1;
        /// The protected bit: a CCMP header follows the MAC header.
        const PROTECTED = 1 << 2;
        /// Part of a fragmented vAP payload.
        const FRAGMENT = 1 << 3;
        /// The final fragment of a fragmented vAP payload.
        const LAST_FRAGMENT = 1 << 4;
    }
}

/// Per-packet metadata, derived by the classifier and carried with the
/// packet until it is destroyed.
///
/// Station and BSSID locations are buffer-relative offsets, valid
/// against whatever the buffer front looks like *now*; any operation
/// that changes the header length restores the MAC header at the
/// buffer front, keeping them valid (see
/// [`crate::engine::ccmp::encapsulate`]).
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameMeta {
    pub flags: FrameFlags,
    /// Total MAC header length, 24..=32 depending on the flags.
    pub hdr_len: usize,
    /// Offset of the station address within the buffer.
    pub sta_off: usize,
    /// Offset of the BSSID within the buffer.
    pub bssid_off: usize,
    /// QoS TID, 0 when no QoS-control field is present.
    pub tid: u8,
    /// The packet number to use for this frame's CCMP header/nonce.
    pub pn: u64,
    /// The vAP tunnel sequence number; with the station address it
    /// keys the reassembly table.
    pub tun_seq: u16,
    /// Position of this fragment within its payload.
    pub frag_index: u8,
}

impl FrameMeta {
    #[inline]
    pub fn station(&self, frame: &[u8]) -> MacAddr {
        let mut b = [0u8; DOT11_ADDR_LEN];
        b.copy_from_slice(&frame[self.sta_off..self.sta_off + DOT11_ADDR_LEN]);
        MacAddr::from(b)
    }

    #[inline]
    pub fn bssid(&self, frame: &[u8]) -> MacAddr {
        let mut b = [0u8; DOT11_ADDR_LEN];
        b.copy_from_slice(
            &frame[self.bssid_off..self.bssid_off + DOT11_ADDR_LEN],
        );
        MacAddr::from(b)
    }

    /// Bytes of CCMP header sitting between the MAC header and the
    /// frame body.
    #[inline]
    pub fn ccmp_len(&self) -> usize {
        if self.flags.contains(FrameFlags::PROTECTED) { CCMP_HDR_LEN } else { 0 }
    }
}

/// The inner classification of a Data frame body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InnerType {
    Eapol,
    Data,
    /// Not a Data frame, or no readable LLC/SNAP sub-header.
    Delimiter,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Dot11Error {
    #[error("frame truncated: have {have}, need {need}")]
    Truncated { have: usize, need: usize },

    #[error("protected frame without a security association")]
    NoSession,

    #[error(transparent)]
    Buf(#[from] BufError),
}

impl From<Dot11Error> for ApdpError {
    fn from(e: Dot11Error) -> Self {
        match e {
            Dot11Error::Truncated { .. } => {
                ApdpError::InvalidInput("truncated 802.11 frame")
            }
            Dot11Error::NoSession => ApdpError::SessionUnavailable,
            Dot11Error::Buf(b) => b.into(),
        }
    }
}

/// Derive [`FrameMeta`] from an 802.11 frame.
///
/// Station/BSSID assignment handles the two DS combinations this
/// data-plane forwards: to-DS set means station = address 2 and
/// BSSID = address 1, otherwise station = address 1 and BSSID =
/// address 2. The remaining two combinations (neither bit, or both)
/// come out with swapped addresses; such frames are dropped further
/// down the pipeline, not corrected here.
pub fn parse_80211(frame: &[u8]) -> Result<FrameMeta, Dot11Error> {
    if frame.len() < DOT11_HDR_LEN_MIN {
        return Err(Dot11Error::Truncated {
            have: frame.len(),
            need: DOT11_HDR_LEN_MIN,
        });
    }

    let fc = read_u16_le(frame, 0);
    let mut flags = FrameFlags::default();
    let mut hdr_len = DOT11_HDR_LEN_MIN;

    if (fc & FC_TO_DS) != 0 && (fc & FC_FROM_DS) != 0 {
        flags |= FrameFlags::HAS_A4;
        hdr_len += DOT11_ADDR_LEN;
    }
    if fc_is_qos_data(fc) {
        flags |= FrameFlags::HAS_QOS;
        hdr_len += QOS_CTRL_LEN;
    }
    if (fc & FC_PROTECTED) != 0 {
        flags |= FrameFlags::PROTECTED;
    }

    if frame.len() < hdr_len {
        return Err(Dot11Error::Truncated { have: frame.len(), need: hdr_len });
    }

    let sc = read_u16_le(frame, DOT11_SEQ_CTRL_OFF);
    let frag_num = sc & SC_FRAG_MASK;
    if (fc & FC_MORE_FRAG) != 0 || frag_num != 0 {
        flags |= FrameFlags::FRAGMENT;
        if (fc & FC_MORE_FRAG) == 0 {
            flags |= FrameFlags::LAST_FRAGMENT;
        }
    }

    let (sta_off, bssid_off) = if (fc & FC_TO_DS) != 0 {
        (DOT11_A2_OFF, DOT11_A1_OFF)
    } else {
        (DOT11_A1_OFF, DOT11_A2_OFF)
    };

    let tid = if flags.contains(FrameFlags::HAS_QOS) {
        (read_u16_le(frame, hdr_len - QOS_CTRL_LEN) & QC_TID_MASK) as u8
    } else {
        0
    };

    Ok(FrameMeta {
        flags,
        hdr_len,
        sta_off,
        bssid_off,
        tid,
        frag_index: (frag_num & 0xFF) as u8,
        ..Default::default()
    })
}

/// Classify the body of a Data frame by its LLC/SNAP sub-header.
///
/// The sub-header sits immediately after the MAC header, and after the
/// CCMP header when the frame is protected.
pub fn classify_inner(frame: &[u8], meta: &FrameMeta) -> InnerType {
    if frame.len() < meta.hdr_len {
        return InnerType::Delimiter;
    }

    let fc = read_u16_le(frame, 0);
    if !fc_is_data(fc) {
        return InnerType::Delimiter;
    }

    let off = meta.hdr_len + meta.ccmp_len();
    let Some(body) = frame.get(off..) else {
        return InnerType::Delimiter;
    };
    let Ok((llc, _)) = LlcSnapHdr::ref_from_prefix(body) else {
        return InnerType::Delimiter;
    };
    if !llc.is_snap() {
        return InnerType::Delimiter;
    }

    match llc.ethertype.get() {
        ETHER_TYPE_EAPOL => InnerType::Eapol,
        _ => InnerType::Data,
    }
}

/// Rewrite an Ethernet frame in place into a Data/QoS-Data frame
/// headed from the distribution system to a station.
///
/// Address 1 is the Ethernet destination, address 2 the local AP
/// address, address 3 the Ethernet source. Unicast destinations get a
/// QoS-control field with TID 0; groups do not. When an SA is present
/// the protected bit is set and tail-room for the MIC (half the key
/// length) is verified up front — the MIC itself is committed by
/// [`crate::engine::ccmp::encapsulate`].
///
/// The LLC/SNAP sub-header carrying the ether-type is owned by the
/// 802.2 layer and is not built here.
pub fn ethernet_to_80211<S: SecAssoc>(
    pkt: &mut PacketBuf,
    bssid: MacAddr,
    sa: Option<&S>,
) -> Result<FrameMeta, Dot11Error> {
    if pkt.len() < ETHER_HDR_LEN {
        return Err(Dot11Error::Truncated {
            have: pkt.len(),
            need: ETHER_HDR_LEN,
        });
    }

    let mut dst = [0u8; DOT11_ADDR_LEN];
    let mut src = [0u8; DOT11_ADDR_LEN];
    dst.copy_from_slice(&pkt[..DOT11_ADDR_LEN]);
    src.copy_from_slice(&pkt[DOT11_ADDR_LEN..2 * DOT11_ADDR_LEN]);

    let qos = MacAddr::from(dst).is_unicast();
    let hdr_len = DOT11_HDR_LEN_MIN + if qos { QOS_CTRL_LEN } else { 0 };

    // Validate every capacity before the first mutation, so a failure
    // leaves the Ethernet frame intact.
    let needed_head = hdr_len - ETHER_HDR_LEN;
    if pkt.head_capacity() < needed_head {
        return Err(BufError::NotEnoughHeadroom {
            available: pkt.head_capacity(),
            needed: needed_head,
        }
        .into());
    }
    if let Some(sa) = sa {
        let mic_len = sa.mic_len();
        if pkt.tail_capacity() < mic_len {
            return Err(BufError::NotEnoughTailroom {
                available: pkt.tail_capacity(),
                needed: mic_len,
            }
            .into());
        }
    }

    pkt.drop_front_bytes(ETHER_HDR_LEN)?;
    pkt.expand_front(hdr_len)?;

    let mut fc = (FRAME_TYPE_DATA << FC_TYPE_SHIFT) | FC_FROM_DS;
    let mut flags = FrameFlags::default();
    if qos {
        fc |= DATA_SUBTYPE_QOS << FC_SUBTYPE_SHIFT;
        flags |= FrameFlags::HAS_QOS;
    }
    if sa.is_some() {
        fc |= FC_PROTECTED;
        flags |= FrameFlags::PROTECTED;
    }

    let hdr = &mut pkt[..hdr_len];
    write_u16_le(hdr, 0, fc);
    // Duration and sequence control are owned by the radio scheduler;
    // zeroed here.
    write_u16_le(hdr, 2, 0);
    hdr[DOT11_A1_OFF..DOT11_A1_OFF + DOT11_ADDR_LEN].copy_from_slice(&dst);
    hdr[DOT11_A2_OFF..DOT11_A2_OFF + DOT11_ADDR_LEN]
        .copy_from_slice(&bssid.bytes());
    hdr[DOT11_A3_OFF..DOT11_A3_OFF + DOT11_ADDR_LEN].copy_from_slice(&src);
    write_u16_le(hdr, DOT11_SEQ_CTRL_OFF, 0);
    if qos {
        write_u16_le(hdr, DOT11_HDR_LEN_MIN, 0);
    }

    // From-DS only: station = address 1, BSSID = address 2.
    Ok(FrameMeta {
        flags,
        hdr_len,
        sta_off: DOT11_A1_OFF,
        bssid_off: DOT11_A2_OFF,
        tid: 0,
        ..Default::default()
    })
}

/// Rewrite an 802.11 Data frame in place into a bare Ethernet frame,
/// carrying forward the ether-type found in the LLC/SNAP sub-header.
///
/// Strips the MAC header, the CCMP header when the frame is
/// protected, and the LLC/SNAP sub-header; trims the MIC trailer from
/// a protected frame. A protected frame with no SA to size that
/// trailer is an error.
pub fn ieee80211_to_ethernet<S: SecAssoc>(
    pkt: &mut PacketBuf,
    meta: &FrameMeta,
    sa: Option<&S>,
) -> Result<(), Dot11Error> {
    let front_len = meta.hdr_len + meta.ccmp_len() + LLC_SNAP_LEN;
    if pkt.len() < front_len {
        return Err(Dot11Error::Truncated { have: pkt.len(), need: front_len });
    }

    let fc = read_u16_le(&pkt[..], 0);
    let snap_off = meta.hdr_len + meta.ccmp_len();
    let Ok((llc, _)) = LlcSnapHdr::ref_from_prefix(&pkt[snap_off..]) else {
        return Err(Dot11Error::Truncated {
            have: pkt.len() - snap_off,
            need: LLC_SNAP_LEN,
        });
    };
    let ethertype = llc.ethertype.get();

    // The inverse of the DS address rule: a to-DS frame carries the
    // destination in address 3, a from-DS frame the source.
    let mut a3 = [0u8; DOT11_ADDR_LEN];
    a3.copy_from_slice(&pkt[DOT11_A3_OFF..DOT11_A3_OFF + DOT11_ADDR_LEN]);
    let sta = meta.station(&pkt[..]);
    let (dst, src) = if (fc & FC_TO_DS) != 0 {
        (MacAddr::from(a3), sta)
    } else {
        (sta, MacAddr::from(a3))
    };

    if meta.flags.contains(FrameFlags::PROTECTED) {
        let sa = sa.ok_or(Dot11Error::NoSession)?;
        pkt.trim_back(sa.mic_len())?;
    }

    pkt.drop_front_bytes(front_len)?;
    pkt.expand_front(ETHER_HDR_LEN)?;

    let hdr = &mut pkt[..ETHER_HDR_LEN];
    hdr[..DOT11_ADDR_LEN].copy_from_slice(&dst.bytes());
    hdr[DOT11_ADDR_LEN..2 * DOT11_ADDR_LEN].copy_from_slice(&src.bytes());
    hdr[12..14].copy_from_slice(&ethertype.to_be_bytes());

    Ok(())
}

/// Canned frames shared by the unit tests across the engine modules.
#[cfg(test)]
pub(crate) mod test_frames {
    use super::*;
    use alloc::vec::Vec;

    pub(crate) const STA: MacAddr =
        MacAddr::from_const([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
    pub(crate) const AP: MacAddr =
        MacAddr::from_const([0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);

    /// A QoS Data frame from the station to the DS, with an LLC/SNAP
    /// body carrying `ethertype`.
    pub(crate) fn qos_data_frame(ethertype: u16, body: &[u8]) -> Vec<u8> {
        #[rustfmt::skip]
        let mut frame = vec![
            // frame control: data, QoS subtype, to-DS
            0x88, 0x01,
            // duration
            0x00, 0x00,
            // a1: BSSID
            0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
            // a2: station
            0x02, 0x11, 0x22, 0x33, 0x44, 0x55,
            // a3: destination
            0x02, 0x99, 0x88, 0x77, 0x66, 0x55,
            // sequence control: seq 77, frag 0
            0xD0, 0x04,
            // QoS control: TID 5
            0x05, 0x00,
        ];
        frame.extend_from_slice(&[
            LLC_SAP_SNAP,
            LLC_SAP_SNAP,
            LLC_CTRL_UI,
            0x00,
            0x00,
            0x00,
        ]);
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(body);
        frame
    }

    /// A plain IPv4 QoS Data frame.
    pub(crate) fn qos_data(body: &[u8]) -> Vec<u8> {
        qos_data_frame(0x0800, body)
    }
}
