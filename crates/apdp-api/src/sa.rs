// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The Security Association interface.
//!
//! The key-lifecycle manager owns key derivation and session-cache
//! construction; the data-plane only consumes a ready-made handle per
//! (direction, AAD length) pair plus the key metadata needed to size
//! the MIC. The SA store is read-mostly and safely shared; the
//! per-direction packet-number counters are the only mutable state and
//! they are atomics owned by the SA itself.

use crate::Direction;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use serde::Deserialize;
use serde::Serialize;

/// An opaque handle to a crypto session held by the offload engine.
///
/// Chosen by the SA subsystem, carried by value inside crypto-operation
/// descriptors so a submitted operation never borrows from the SA.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// One encryption relationship: key metadata plus session lookup.
///
/// Implemented by the external SA/key subsystem. The AAD length varies
/// with the optional 802.11 fields (4th address, QoS control), so a
/// session exists per (direction, AAD length) variant; a missing
/// variant excludes the packet from its batch rather than failing the
/// batch.
pub trait SecAssoc {
    /// The transient key length in bytes (16 for CCMP-128).
    fn key_len(&self) -> usize;

    /// The key-id to place in the CCMP header (0..=3).
    fn key_id(&self) -> u8;

    /// The session for this direction and AAD length, if one exists.
    fn session_for(
        &self,
        dir: Direction,
        aad_len: usize,
    ) -> Option<SessionHandle>;

    /// The MIC/digest length: always half the transient key length.
    fn mic_len(&self) -> usize {
        self.key_len() / 2
    }
}

/// A 48-bit packet-number counter, one per SA per direction.
///
/// The transmit side starts at 1 and takes the next value per
/// encrypted packet; the receive side starts at 0 and serves as the
/// replay baseline. Never decremented.
#[derive(Debug)]
pub struct PnCounter(AtomicU64);

impl PnCounter {
    /// A transmit counter. The first call to [`PnCounter::next`]
    /// returns 1.
    pub const fn transmit() -> Self {
        Self(AtomicU64::new(0))
    }

    /// A receive-side replay baseline, starting at 0.
    pub const fn receive() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Take the next packet number.
    #[inline]
    pub fn next(&self) -> u64 {
        // The counter guards only its own value; Relaxed suffices.
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Advance the baseline to `pn` if it is strictly newer.
    ///
    /// On failure the baseline is left unchanged and returned in the
    /// error.
    #[inline]
    pub fn advance(&self, pn: u64) -> Result<(), u64> {
        let prev = self.0.fetch_max(pn, Ordering::Relaxed);
        if pn <= prev { Err(prev) } else { Ok(()) }
    }

    /// The current value.
    #[inline]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
