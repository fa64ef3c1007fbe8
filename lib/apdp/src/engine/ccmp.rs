// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The CCMP codec.
//!
//! Pure functions deriving the AAD, nonce, and CCMP header from frame
//! metadata and a packet number, plus the in-place buffer
//! transformations that insert and remove the CCMP header. The actual
//! AES-CCM runs in the offload engine; everything here must stay
//! byte-exact with the offsets handed to it.

use crate::buf::BufError;
use crate::buf::PacketBuf;
use crate::engine::dot11::DOT11_A2_OFF;
use crate::engine::dot11::DOT11_A4_OFF;
use crate::engine::dot11::DOT11_ADDR_LEN;
use crate::engine::dot11::DOT11_HDR_LEN_MAX;
use crate::engine::dot11::DOT11_HDR_LEN_MIN;
use crate::engine::dot11::DOT11_SEQ_CTRL_OFF;
use crate::engine::dot11::FC_MORE_DATA;
use crate::engine::dot11::FC_ORDER;
use crate::engine::dot11::FC_PROTECTED;
use crate::engine::dot11::FC_PWR_MGMT;
use crate::engine::dot11::FC_RETRY;
use crate::engine::dot11::FrameFlags;
use crate::engine::dot11::FrameMeta;
use crate::engine::dot11::QC_TID_MASK;
use crate::engine::dot11::QOS_CTRL_LEN;
use crate::engine::dot11::SC_FRAG_MASK;
use crate::engine::dot11::fc_is_data;
use apdp_api::ApdpError;
use apdp_api::PnCounter;
use heapless::Vec as FixedVec;

/// The CCMP header: PN0 PN1 rsvd key-byte PN2 PN3 PN4 PN5.
pub const CCMP_HDR_LEN: usize = 8;
/// Flags byte + transmitter address + 6-byte PN.
pub const CCMP_NONCE_LEN: usize = 13;
pub const CCMP_PN_LEN: usize = 6;

/// The extended-IV bit in the key byte; always set for CCMP.
pub const CCMP_EXT_IV: u8 = 0x20;
pub const CCMP_KEY_ID_SHIFT: u8 = 6;

/// Frame control + three addresses + sequence control, before the
/// optional fields.
pub const AAD_LEN_MIN: usize = 22;
/// All optional fields present: a 4th address and QoS control.
pub const AAD_LEN_MAX: usize = 30;

/// Frame-control bits zeroed in the AAD for every frame.
const AAD_FC_CLEAR: u16 = FC_RETRY | FC_PWR_MGMT | FC_MORE_DATA;
/// Subtype bits 4..=6, zeroed in the AAD for Data frames only; bit 7
/// (the QoS bit) survives.
const AAD_FC_SUBTYPE_CLEAR: u16 = 0x0070;

/// The AAD for one frame. Variable length; callers must carry
/// [`Aad::len`] alongside the bytes, it is not a constant.
pub type Aad = FixedVec<u8, AAD_LEN_MAX>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CcmpError {
    #[error("header truncated: have {have}, need {need}")]
    Truncated { have: usize, need: usize },

    #[error("replayed packet number {pn} (baseline {baseline})")]
    Replay { pn: u64, baseline: u64 },

    #[error(transparent)]
    Buf(#[from] BufError),
}

impl From<CcmpError> for ApdpError {
    fn from(e: CcmpError) -> Self {
        match e {
            CcmpError::Truncated { .. } => {
                ApdpError::InvalidInput("truncated CCMP input")
            }
            CcmpError::Replay { pn, baseline } => {
                ApdpError::ReplayDetected { pn, baseline }
            }
            CcmpError::Buf(b) => b.into(),
        }
    }
}

pub type CcmpResult<T> = core::result::Result<T, CcmpError>;

#[inline]
fn read_u16_le(bytes: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

/// Build the Additional Authenticated Data for a frame.
///
/// Deterministic over (header bytes, metadata): frame control with the
/// mutable bits masked, the three addresses verbatim, sequence control
/// with the sequence number zeroed (fragment number preserved), then
/// the 4th address and the TID-only QoS control when present.
pub fn build_aad(frame: &[u8], meta: &FrameMeta) -> CcmpResult<Aad> {
    let mut need = DOT11_HDR_LEN_MIN;
    if meta.flags.contains(FrameFlags::HAS_A4) {
        need += DOT11_ADDR_LEN;
    }
    if meta.flags.contains(FrameFlags::HAS_QOS) {
        need += QOS_CTRL_LEN;
    }
    if frame.len() < need {
        return Err(CcmpError::Truncated { have: frame.len(), need });
    }

    let mut fc = read_u16_le(frame, 0);
    if fc_is_data(fc) {
        fc &= !AAD_FC_SUBTYPE_CLEAR;
    }
    fc &= !AAD_FC_CLEAR;
    fc |= FC_PROTECTED;
    if meta.flags.contains(FrameFlags::HAS_QOS) {
        fc &= !FC_ORDER;
    }

    let sc = read_u16_le(frame, DOT11_SEQ_CTRL_OFF) & SC_FRAG_MASK;

    let mut aad = Aad::new();
    // Unwrap safety: every variant below fits in AAD_LEN_MAX by
    // construction.
    aad.extend_from_slice(&fc.to_le_bytes()).unwrap();
    aad.extend_from_slice(&frame[4..4 + 3 * DOT11_ADDR_LEN]).unwrap();
    aad.extend_from_slice(&sc.to_le_bytes()).unwrap();

    let mut opt_off = DOT11_A4_OFF;
    if meta.flags.contains(FrameFlags::HAS_A4) {
        aad.extend_from_slice(&frame[opt_off..opt_off + DOT11_ADDR_LEN])
            .unwrap();
        opt_off += DOT11_ADDR_LEN;
    }
    if meta.flags.contains(FrameFlags::HAS_QOS) {
        let qc = read_u16_le(frame, opt_off) & QC_TID_MASK;
        aad.extend_from_slice(&qc.to_le_bytes()).unwrap();
    }

    Ok(aad)
}

/// Build the 13-byte CCM nonce: one flags byte (priority from the QoS
/// TID, 0 otherwise; the management bit is reserved), the transmitter
/// address, then the packet number most-significant byte first.
pub fn build_nonce(
    frame: &[u8],
    meta: &FrameMeta,
    pn: u64,
) -> CcmpResult<[u8; CCMP_NONCE_LEN]> {
    if frame.len() < DOT11_A2_OFF + DOT11_ADDR_LEN {
        return Err(CcmpError::Truncated {
            have: frame.len(),
            need: DOT11_A2_OFF + DOT11_ADDR_LEN,
        });
    }

    let mut nonce = [0u8; CCMP_NONCE_LEN];
    if meta.flags.contains(FrameFlags::HAS_QOS) {
        nonce[0] = meta.tid & QC_TID_MASK as u8;
    }
    nonce[1..1 + DOT11_ADDR_LEN]
        .copy_from_slice(&frame[DOT11_A2_OFF..DOT11_A2_OFF + DOT11_ADDR_LEN]);
    for (i, b) in nonce[7..].iter_mut().enumerate() {
        *b = (pn >> (40 - 8 * i)) as u8;
    }

    Ok(nonce)
}

/// Build the 8-byte CCMP header for a packet number and key id.
///
/// The PN is written least-significant byte first, split across the
/// two low bytes and the four high bytes with the reserved byte and
/// the key byte between them; the extended-IV bit is always set.
pub fn build_ccmp_header(pn: u64, key_id: u8) -> [u8; CCMP_HDR_LEN] {
    [
        pn as u8,
        (pn >> 8) as u8,
        0,
        CCMP_EXT_IV | (key_id << CCMP_KEY_ID_SHIFT),
        (pn >> 16) as u8,
        (pn >> 24) as u8,
        (pn >> 32) as u8,
        (pn >> 40) as u8,
    ]
}

/// Extract the 48-bit packet number from a CCMP header.
pub fn pn_from_header(hdr: &[u8]) -> CcmpResult<u64> {
    if hdr.len() < CCMP_HDR_LEN {
        return Err(CcmpError::Truncated {
            have: hdr.len(),
            need: CCMP_HDR_LEN,
        });
    }

    Ok(u64::from(hdr[0])
        | u64::from(hdr[1]) << 8
        | u64::from(hdr[4]) << 16
        | u64::from(hdr[5]) << 24
        | u64::from(hdr[6]) << 32
        | u64::from(hdr[7]) << 40)
}

/// Validate PN monotonicity for a received frame.
///
/// Extracts the packet number from the CCMP header and advances the
/// baseline to it, failing with [`CcmpError::Replay`] (baseline
/// untouched) if it is not strictly newer. Run only after a
/// successful decrypt completion.
///
/// The check itself is compiled out under the `no-replay-check`
/// feature; the PN extraction remains so the decrypt path keeps its
/// shape.
pub fn replay_check(hdr: &[u8], baseline: &PnCounter) -> CcmpResult<u64> {
    let pn = pn_from_header(hdr)?;

    #[cfg(not(feature = "no-replay-check"))]
    baseline
        .advance(pn)
        .map_err(|baseline| CcmpError::Replay { pn, baseline })?;

    #[cfg(feature = "no-replay-check")]
    let _ = baseline;

    Ok(pn)
}

/// Insert the CCMP header behind the MAC header and commit tail space
/// for the MIC.
///
/// The source and destination ranges of the header move overlap, so
/// this is an explicit three-step contract: snapshot the MAC header,
/// grow the buffer at the head, restore the snapshot in front of the
/// gap; the CCMP header (built from `meta.pn`) is then written into
/// the gap and the tail grown by `mic_len` zeroed bytes.
///
/// The MAC header lands back at the buffer front, so the buffer-
/// relative station/BSSID offsets in `meta` remain valid.
pub fn encapsulate(
    pkt: &mut PacketBuf,
    meta: &mut FrameMeta,
    key_id: u8,
    mic_len: usize,
) -> CcmpResult<()> {
    let hdr_len = meta.hdr_len;
    if pkt.len() < hdr_len
        || hdr_len < DOT11_HDR_LEN_MIN
        || hdr_len > DOT11_HDR_LEN_MAX
    {
        return Err(CcmpError::Truncated { have: pkt.len(), need: hdr_len });
    }

    // Validate both growths before the first mutation.
    if pkt.head_capacity() < CCMP_HDR_LEN {
        return Err(BufError::NotEnoughHeadroom {
            available: pkt.head_capacity(),
            needed: CCMP_HDR_LEN,
        }
        .into());
    }
    if pkt.tail_capacity() < mic_len {
        return Err(BufError::NotEnoughTailroom {
            available: pkt.tail_capacity(),
            needed: mic_len,
        }
        .into());
    }

    // Snapshot -> resize -> restore.
    let mut hdr = [0u8; DOT11_HDR_LEN_MAX];
    hdr[..hdr_len].copy_from_slice(&pkt[..hdr_len]);

    pkt.expand_front(CCMP_HDR_LEN)?;
    pkt[..hdr_len].copy_from_slice(&hdr[..hdr_len]);
    pkt[hdr_len..hdr_len + CCMP_HDR_LEN]
        .copy_from_slice(&build_ccmp_header(meta.pn, key_id));

    pkt.append_zeroed(mic_len)?;
    meta.flags |= FrameFlags::PROTECTED;

    Ok(())
}

/// Remove the CCMP header and the MIC trailer: the inverse of
/// [`encapsulate`], with the same snapshot -> resize -> restore
/// discipline.
pub fn decapsulate(
    pkt: &mut PacketBuf,
    meta: &mut FrameMeta,
    mic_len: usize,
) -> CcmpResult<()> {
    let hdr_len = meta.hdr_len;
    let need = hdr_len + CCMP_HDR_LEN + mic_len;
    if pkt.len() < need
        || hdr_len < DOT11_HDR_LEN_MIN
        || hdr_len > DOT11_HDR_LEN_MAX
    {
        return Err(CcmpError::Truncated { have: pkt.len(), need });
    }

    let mut hdr = [0u8; DOT11_HDR_LEN_MAX];
    hdr[..hdr_len].copy_from_slice(&pkt[..hdr_len]);

    pkt.drop_front_bytes(CCMP_HDR_LEN)?;
    pkt[..hdr_len].copy_from_slice(&hdr[..hdr_len]);
    pkt.trim_back(mic_len)?;
    meta.flags.remove(FrameFlags::PROTECTED);

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::dot11::parse_80211;

    /// A protected QoS Data frame (to-DS) with a CCMP header for
    /// PN 0x0000_0B0A_0D0C, key id 1, an 8-byte body and an 8-byte
    /// MIC.
    #[rustfmt::skip]
    fn protected_frame() -> Vec<u8> {
        vec![
            // frame control: QoS data, to-DS, retry, protected
            0x88, 0x49,
            // duration
            0x00, 0x00,
            // a1: BSSID
            0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
            // a2: station
            0x02, 0x11, 0x22, 0x33, 0x44, 0x55,
            // a3: destination
            0x02, 0x99, 0x88, 0x77, 0x66, 0x55,
            // sequence control: seq 77, frag 2
            0xD2, 0x04,
            // QoS control: TID 5
            0x05, 0x00,
            // CCMP header: PN0 PN1 rsvd key PN2 PN3 PN4 PN5
            0x0C, 0x0D, 0x00, 0x60, 0x0A, 0x0B, 0x00, 0x00,
            // body
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
            // MIC
            0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7,
        ]
    }

    #[test]
    fn aad_masks_and_length() {
        let frame = protected_frame();
        let meta = parse_80211(&frame).unwrap();
        let aad = build_aad(&frame, &meta).unwrap();

        #[rustfmt::skip]
        let expected: &[u8] = &[
            // frame control: subtype bits 4..=6 and retry cleared,
            // protected kept, QoS bit kept
            0x88, 0x41,
            // a1..a3 verbatim
            0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
            0x02, 0x11, 0x22, 0x33, 0x44, 0x55,
            0x02, 0x99, 0x88, 0x77, 0x66, 0x55,
            // sequence control: sequence zeroed, fragment 2 kept
            0x02, 0x00,
            // QoS control: TID 5, everything else zeroed
            0x05, 0x00,
        ];
        assert_eq!(&aad[..], expected);
        assert_eq!(aad.len(), AAD_LEN_MIN + QOS_CTRL_LEN);
    }

    #[test]
    fn aad_is_deterministic_and_length_tracks_options() {
        let frame = protected_frame();
        let mut meta = parse_80211(&frame).unwrap();

        let a = build_aad(&frame, &meta).unwrap();
        let b = build_aad(&frame, &meta).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);

        // Toggling QoS presence moves the length by exactly the
        // QoS-control size.
        meta.flags.remove(FrameFlags::HAS_QOS);
        let no_qos = build_aad(&frame, &meta).unwrap();
        assert_eq!(no_qos.len(), AAD_LEN_MIN);

        // Toggling the 4th address moves it by exactly one address.
        let mut frame4 = frame.clone();
        frame4[1] |= 0x02; // from-DS: both DS bits now set
        let meta4 = parse_80211(&frame4).unwrap();
        let with_a4 = build_aad(&frame4, &meta4).unwrap();
        assert_eq!(with_a4.len(), AAD_LEN_MIN + DOT11_ADDR_LEN + QOS_CTRL_LEN);
        assert_eq!(with_a4.len(), AAD_LEN_MAX);
    }

    #[test]
    fn aad_forces_protected_bit() {
        let mut frame = protected_frame();
        frame[1] &= !0x40; // clear the protected bit on the wire
        let meta = parse_80211(&frame).unwrap();
        let aad = build_aad(&frame, &meta).unwrap();
        assert_eq!(aad[1] & 0x40, 0x40);
    }

    #[test]
    fn nonce_layout() {
        let frame = protected_frame();
        let meta = parse_80211(&frame).unwrap();
        let pn = 0x0000_AABB_CCDD_EEFF_u64 & 0x0000_FFFF_FFFF_FFFF;
        let nonce = build_nonce(&frame, &meta, pn).unwrap();

        #[rustfmt::skip]
        let expected = [
            // priority = TID
            0x05,
            // transmitter address (a2)
            0x02, 0x11, 0x22, 0x33, 0x44, 0x55,
            // PN, most-significant byte first
            0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
        ];
        assert_eq!(nonce, expected);

        // No QoS: priority byte is zero.
        let mut no_qos = meta;
        no_qos.flags.remove(FrameFlags::HAS_QOS);
        let nonce = build_nonce(&frame, &no_qos, pn).unwrap();
        assert_eq!(nonce[0], 0);
    }

    #[test]
    fn ccmp_header_layout() {
        let hdr = build_ccmp_header(0x0000_0B0A_0D0C, 1);
        assert_eq!(hdr, [0x0C, 0x0D, 0x00, 0x60, 0x0A, 0x0B, 0x00, 0x00]);

        // Key id 0 still carries the extended-IV bit.
        let hdr = build_ccmp_header(1, 0);
        assert_eq!(hdr, [0x01, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn pn_round_trips_through_header() {
        for pn in [0u64, 1, 0xFFFF, 0x0000_FFFF_FFFF_FFFF] {
            let hdr = build_ccmp_header(pn, 2);
            assert_eq!(pn_from_header(&hdr).unwrap(), pn);
        }
    }

    #[test]
    fn replay_monotonicity() {
        let baseline = PnCounter::receive();

        assert_eq!(
            replay_check(&build_ccmp_header(5, 0), &baseline).unwrap(),
            5
        );
        assert_eq!(
            replay_check(&build_ccmp_header(9, 0), &baseline).unwrap(),
            9
        );

        // Equal and lower PNs fail without advancing the baseline.
        for pn in [9, 8, 1, 0] {
            assert_eq!(
                replay_check(&build_ccmp_header(pn, 0), &baseline),
                Err(CcmpError::Replay { pn, baseline: 9 })
            );
        }
        assert_eq!(baseline.current(), 9);

        assert_eq!(
            replay_check(&build_ccmp_header(10, 0), &baseline).unwrap(),
            10
        );
    }

    #[test]
    fn encap_decap_round_trip() {
        // An unprotected QoS frame with a body; CCMP-128 => MIC 8.
        let frame = crate::engine::dot11::test_frames::qos_data(&[9u8; 16]);
        let mut meta = parse_80211(&frame).unwrap();
        let mut pkt =
            PacketBuf::new_with_headroom(CCMP_HDR_LEN, frame.len() + 8);
        pkt.append_bytes(&frame).unwrap();

        let orig_len = pkt.len();
        let (sta0, bssid0) = (meta.sta_off, meta.bssid_off);

        meta.pn = 7;
        encapsulate(&mut pkt, &mut meta, 0, 8).unwrap();

        // Head grew by exactly the CCMP header, tail by exactly the
        // MIC.
        assert_eq!(pkt.len(), orig_len + CCMP_HDR_LEN + 8);
        assert_eq!(&pkt[..meta.hdr_len], &frame[..meta.hdr_len]);
        assert_eq!(
            &pkt[meta.hdr_len..meta.hdr_len + CCMP_HDR_LEN],
            &build_ccmp_header(7, 0)
        );
        assert_eq!(
            &pkt[meta.hdr_len + CCMP_HDR_LEN..pkt.len() - 8],
            &frame[meta.hdr_len..]
        );
        assert!(meta.flags.contains(FrameFlags::PROTECTED));

        decapsulate(&mut pkt, &mut meta, 8).unwrap();
        assert_eq!(&pkt[..], &frame[..]);
        assert_eq!((meta.sta_off, meta.bssid_off), (sta0, bssid0));
        assert!(!meta.flags.contains(FrameFlags::PROTECTED));
    }

    #[test]
    fn encap_failures_leave_buffer_intact() {
        let frame = crate::engine::dot11::test_frames::qos_data(&[1u8; 4]);
        let mut meta = parse_80211(&frame).unwrap();

        // No headroom for the CCMP header.
        let mut pkt = PacketBuf::copy(&frame);
        assert!(matches!(
            encapsulate(&mut pkt, &mut meta, 0, 8),
            Err(CcmpError::Buf(BufError::NotEnoughHeadroom { .. }))
        ));
        assert_eq!(&pkt[..], &frame[..]);

        // Headroom but no tailroom for the MIC.
        let mut pkt = PacketBuf::copy_with_headroom(CCMP_HDR_LEN, &frame);
        assert!(matches!(
            encapsulate(&mut pkt, &mut meta, 0, 8),
            Err(CcmpError::Buf(BufError::NotEnoughTailroom { .. }))
        ));
        assert_eq!(&pkt[..], &frame[..]);
    }
}
