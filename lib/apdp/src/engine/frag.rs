// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! vAP payload fragmentation and reassembly.
//!
//! Oversized 802.11 payloads are split for the tunnel to the radio
//! head-end and reassembled on the far side. The split itself is
//! plain arithmetic: every non-final fragment is exactly max-sized.
//! On the receive side each fragment is framed with a synthetic
//! IPv4-style header (never transmitted) whose fields carry the table
//! key and the fragment position in the standard 8-byte-unit fragment
//! encoding; the reassembly core reads the key and position back out
//! of that header alone.
//!
//! Expired partial reassemblies are not freed in place: an expiry scan
//! moves them to a deferred free list (the death row) so in-flight
//! lookups never see a buffer vanish under them, and
//! [`FragTable::flush_expired`] releases them in a later pass.

use crate::buf::BufError;
use crate::buf::PacketBuf;
use crate::engine::dot11::FrameFlags;
use crate::engine::dot11::FrameMeta;
use crate::time::Moment;
use crate::time::Ttl;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use apdp_api::ApdpError;
use apdp_api::FragCfg;
use apdp_api::MacAddr;
use core::num::NonZeroU32;
use log::debug;
use log::warn;
use smoltcp::wire::Ipv4Address;
use smoltcp::wire::Ipv4Packet;

/// Fragment offsets are encoded in units of 8 bytes.
pub const FRAG_ALIGN: usize = 8;

/// The synthetic framing header prepended to received fragments on
/// their way into the reassembly core.
pub const SYNTH_HDR_LEN: usize = 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FragError {
    /// Fatal at init, never at runtime.
    #[error("max fragment size {0} is not a multiple of 8")]
    BadAlign(usize),

    #[error("fragment count mismatch: wanted {wanted}, got {got}")]
    CountMismatch { wanted: usize, got: usize },

    #[error("reassembly table full ({0} entries)")]
    MaxCapacity(u32),

    #[error(transparent)]
    Buf(#[from] BufError),
}

impl From<FragError> for ApdpError {
    fn from(e: FragError) -> Self {
        match e {
            FragError::BadAlign(sz) => ApdpError::BadFragmentSize(sz),
            FragError::CountMismatch { wanted, got } => {
                ApdpError::FragmentCountMismatch { wanted, got }
            }
            FragError::MaxCapacity(n) => ApdpError::MaxCapacity(n as u64),
            FragError::Buf(b) => b.into(),
        }
    }
}

pub type FragResult<T> = core::result::Result<T, FragError>;

/// One partial reassembly, keyed by (station, tunnel sequence).
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct FragKey {
    pub sta: MacAddr,
    pub seq: u16,
}

#[derive(Debug)]
struct FragEntry {
    /// (byte offset, fragment) pairs in arrival order.
    frags: Vec<(usize, PacketBuf)>,
    /// Total payload length, known once the final fragment arrives.
    total: Option<usize>,
    /// Bytes held so far.
    have: usize,
    created: Moment,
}

impl FragEntry {
    fn new(created: Moment) -> Self {
        Self { frags: Vec::new(), total: None, have: 0, created }
    }

    fn is_complete(&self) -> bool {
        self.total.is_some_and(|t| self.have == t)
    }
}

/// Counters for one reassembly table.
#[derive(Clone, Copy, Debug, Default)]
pub struct FragStats {
    pub reassembled: u64,
    pub expired: u64,
    pub dropped: u64,
}

/// A bounded reassembly table with TTL expiry through a death row.
///
/// Designed for single-owner-per-shard access; a caller sharing one
/// table across workers must wrap it in its own lock.
#[derive(Debug)]
pub struct FragTable {
    map: BTreeMap<FragKey, FragEntry>,
    limit: NonZeroU32,
    ttl: Ttl,
    max_frag_size: usize,
    death_row: Vec<FragEntry>,
    stats: FragStats,
}

impl FragTable {
    /// Build a table from config, converting the TTL into the internal
    /// time unit.
    ///
    /// Fails fatally when `max_fragment_size` is zero or not a
    /// multiple of 8 — the fragment-offset encoding cannot express
    /// such a split.
    pub fn new(cfg: &FragCfg) -> FragResult<Self> {
        if cfg.max_fragment_size == 0
            || cfg.max_fragment_size % FRAG_ALIGN != 0
        {
            return Err(FragError::BadAlign(cfg.max_fragment_size));
        }

        Ok(Self {
            map: BTreeMap::new(),
            limit: cfg.capacity,
            ttl: Ttl::new_millis(cfg.ttl_millis),
            max_frag_size: cfg.max_fragment_size,
            death_row: Vec::new(),
            stats: FragStats::default(),
        })
    }

    pub fn stats(&self) -> FragStats {
        self.stats
    }

    /// Partial reassemblies currently in the table.
    pub fn num_partial(&self) -> usize {
        self.map.len()
    }

    /// Split a payload into exactly `count` fragments of at most the
    /// configured size each.
    ///
    /// Every non-final fragment is exactly max-sized, so a fragment's
    /// position is fully determined by its index. Each piece is
    /// allocated with head-room for the synthetic framing the receive
    /// side prepends in [`FragTable::reassemble`].
    pub fn fragment(
        &self,
        pkt: PacketBuf,
        count: usize,
    ) -> FragResult<Vec<PacketBuf>> {
        let payload: &[u8] = &pkt;
        let total = payload.len();
        let mut out = Vec::with_capacity(count);
        let mut off = 0;

        while off < total {
            let take = self.max_frag_size.min(total - off);
            let mut frag =
                PacketBuf::new_with_headroom(SYNTH_HDR_LEN, take);
            frag.append_bytes(&payload[off..off + take])?;

            out.push(frag);
            off += take;
        }

        if out.len() != count {
            return Err(FragError::CountMismatch {
                wanted: count,
                got: out.len(),
            });
        }

        Ok(out)
    }

    /// Feed one received fragment into the table.
    ///
    /// The fragment is framed with a synthetic IPv4-style header:
    /// source address overloaded with the station's hardware address
    /// for key uniqueness, identification carrying the tunnel
    /// sequence number, don't-fragment clear, more-fragments set
    /// unless this is the final fragment, and the fragment offset
    /// (`meta.frag_index` times the configured fragment size) in the
    /// offset field. The reassembly core reads the key and position
    /// back out of that header; the fragment must carry
    /// [`SYNTH_HDR_LEN`] bytes of head-room for it.
    ///
    /// Returns the reassembled payload once every byte for the
    /// (station, sequence) key has arrived, or `None` while the
    /// reassembly is still partial. Fragments may arrive in any order
    /// within the TTL.
    pub fn reassemble(
        &mut self,
        mut pkt: PacketBuf,
        now: Moment,
        sta: MacAddr,
        meta: &FrameMeta,
    ) -> FragResult<Option<PacketBuf>> {
        let off = meta.frag_index as usize * self.max_frag_size;
        let last = meta.flags.contains(FrameFlags::LAST_FRAGMENT);
        let total_len = (SYNTH_HDR_LEN + pkt.len()) as u16;

        pkt.expand_front(SYNTH_HDR_LEN)?;
        let sta = sta.bytes();
        let mut ip = Ipv4Packet::new_unchecked(&mut pkt[..]);
        ip.set_version(4);
        ip.set_header_len(SYNTH_HDR_LEN as u8);
        ip.set_total_len(total_len);
        ip.set_ident(meta.tun_seq);
        ip.set_dont_frag(false);
        ip.set_more_frags(!last);
        ip.set_frag_offset(off as u16);
        ip.set_src_addr(Ipv4Address::from_bytes(&sta[..4]));
        ip.set_dst_addr(Ipv4Address::from_bytes(&[sta[4], sta[5], 0, 0]));

        self.feed(pkt, now)
    }

    /// The reassembly core: everything from here down derives the
    /// table key and the fragment's position from the synthetic
    /// header, never from frame metadata.
    fn feed(
        &mut self,
        framed: PacketBuf,
        now: Moment,
    ) -> FragResult<Option<PacketBuf>> {
        let (key, off, last) = {
            let ip = Ipv4Packet::new_unchecked(&framed[..]);
            let src = ip.src_addr();
            let dst = ip.dst_addr();
            let (s, d) = (src.as_bytes(), dst.as_bytes());
            let sta = MacAddr::from([s[0], s[1], s[2], s[3], d[0], d[1]]);
            (
                FragKey { sta, seq: ip.ident() },
                usize::from(ip.frag_offset()),
                !ip.more_frags(),
            )
        };

        let mut pkt = framed;
        pkt.drop_front_bytes(SYNTH_HDR_LEN)?;

        // A stale partial under the same key goes to the death row,
        // never freed in place.
        if let Some(entry) = self.map.get(&key)
            && self.ttl.is_expired(entry.created, now)
        {
            // Unwrap safety: presence checked just above.
            let stale = self.map.remove(&key).unwrap();
            self.stats.expired += 1;
            self.death_row.push(stale);
        }

        if !self.map.contains_key(&key) {
            if self.map.len() >= self.limit.get() as usize {
                self.sweep(now);
            }
            if self.map.len() >= self.limit.get() as usize {
                self.stats.dropped += 1;
                return Err(FragError::MaxCapacity(self.limit.get()));
            }
            self.map.insert(key, FragEntry::new(now));
        }

        // Unwrap safety: inserted above if absent.
        let entry = self.map.get_mut(&key).unwrap();

        if entry.frags.iter().any(|(o, _)| *o == off) {
            debug!("duplicate fragment at offset {off} for {}", key.sta);
            self.stats.dropped += 1;
            return Ok(None);
        }

        entry.have += pkt.len();
        if last {
            entry.total = Some(off + pkt.len());
        }
        entry.frags.push((off, pkt));

        if !entry.is_complete() {
            return Ok(None);
        }

        // Unwrap safety: completeness implies presence, and a
        // complete entry has a total.
        let mut entry = self.map.remove(&key).unwrap();
        let total = entry.total.unwrap();
        entry.frags.sort_unstable_by_key(|(o, _)| *o);

        let mut out = PacketBuf::new_with_headroom(SYNTH_HDR_LEN, total);
        for (o, frag) in &entry.frags {
            if *o != out.len() {
                // A gap with the right byte count means overlapping
                // or misplaced fragments; the whole payload is
                // unusable.
                warn!("misaligned fragment chain for {}", key.sta);
                self.stats.dropped += 1;
                return Ok(None);
            }
            out.append_bytes(frag)?;
        }

        self.stats.reassembled += 1;
        Ok(Some(out))
    }

    /// Move every expired partial reassembly to the death row.
    /// Periodic: timeouts are enforced by this scan, not per-entry
    /// timers.
    pub fn sweep(&mut self, now: Moment) -> usize {
        let ttl = self.ttl;
        let death_row = &mut self.death_row;
        let before = death_row.len();

        self.map.retain(|key, entry| {
            if ttl.is_expired(entry.created, now) {
                debug!("reassembly for {} expired", key.sta);
                death_row.push(core::mem::replace(
                    entry,
                    FragEntry::new(now),
                ));
                return false;
            }

            true
        });

        let moved = self.death_row.len() - before;
        self.stats.expired += moved as u64;
        moved
    }

    /// Release everything on the death row. Must run periodically,
    /// from a context where no lookup borrows are alive.
    pub fn flush_expired(&mut self) -> usize {
        let n = self.death_row.len();
        self.death_row.clear();
        n
    }
}
