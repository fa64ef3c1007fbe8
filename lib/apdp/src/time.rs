// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Moments and TTLs.
//!
//! The engine never reads a clock of its own: callers pass `now` into
//! the operations that need it and run the expiry scans. Timeouts are
//! enforced by those scans, not per-entry timers.

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of nanoseconds in a second.
pub const NANOS: u64 = 1_000_000_000;
/// The conversion from nanoseconds to milliseconds.
pub const NANOS_TO_MILLIS: u64 = NANOS / MILLIS;

/// A point in time, measured in nanoseconds from an arbitrary origin.
///
/// Only differences between moments are meaningful; all moments handed
/// to one table must come from the same origin.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment(u64);

impl Moment {
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms * NANOS_TO_MILLIS)
    }

    pub const fn raw_nanos(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, saturating at zero if
    /// `earlier` is in fact later.
    #[inline]
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        self.0.saturating_sub(earlier.0) / NANOS_TO_MILLIS
    }

    pub const fn add_millis(&self, ms: u64) -> Self {
        Self(self.0 + ms * NANOS_TO_MILLIS)
    }
}

cfg_if! {
    if #[cfg(any(feature = "std", test))] {
        use std::time::SystemTime;
        use std::time::UNIX_EPOCH;

        impl Moment {
            /// The current moment, for userland callers that have no
            /// data-plane clock of their own.
            pub fn now() -> Self {
                // Unwrap safety: the system clock does not predate the
                // epoch.
                let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
                Self(d.as_nanos() as u64)
            }
        }
    }
}

/// The Time To Live in milliseconds.
#[derive(Clone, Copy, Debug)]
pub struct Ttl(u64);

impl Ttl {
    pub const fn new_millis(millis: u64) -> Self {
        Ttl(millis)
    }

    /// Create a new TTL based on seconds.
    pub const fn new_seconds(seconds: u64) -> Self {
        Ttl(seconds * MILLIS)
    }

    pub fn as_seconds(&self) -> u64 {
        self.0 / MILLIS
    }

    pub fn as_milliseconds(&self) -> u64 {
        self.0
    }

    /// Is `created` expired?
    pub fn is_expired(&self, created: Moment, now: Moment) -> bool {
        now.delta_as_millis(created) >= self.0
    }
}
