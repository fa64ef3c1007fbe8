// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The API types shared between the AP data-plane engine and its
//! consumers: the tunnel encapsulators, the SA/key-lifecycle manager,
//! and the control plane.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cfg;
pub mod mac;
pub mod sa;

pub use cfg::*;
pub use mac::*;
pub use sa::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment.
pub const API_VERSION: u64 = 3;

/// The direction of a crypto operation relative to the air interface:
/// `Out` encrypts frames headed to the radio head-end, `In` decrypts
/// frames received from it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    In = 1,
    Out = 2,
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            _ => Err(format!("invalid direction: {}", s)),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        };

        write!(f, "{}", dirstr)
    }
}

/// The coarse error taxonomy of the data-plane.
///
/// The engine modules carry finer-grained error types; each converts
/// into one of these variants at the crate boundary. Per-packet
/// failures inside a batch never abort sibling packets; only
/// `BadFragmentSize` is fatal, and only at initialization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ApdpError {
    /// Null or malformed arguments. Never recovered from, propagated
    /// immediately.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Head or tail room exhausted on a buffer grow/shrink.
    #[error("buffer capacity exceeded: available {available}, needed {needed}")]
    BufferCapacityExceeded { available: usize, needed: usize },

    /// A received packet number was not strictly increasing.
    #[error("replayed packet number {pn} (baseline {baseline})")]
    ReplayDetected { pn: u64, baseline: u64 },

    /// The SA has no session for this (direction, AAD length) pair.
    /// The packet is excluded from its batch, not retried.
    #[error("no crypto session for this direction/AAD length")]
    SessionUnavailable,

    /// The fragmentation primitive produced an unexpected split.
    #[error("fragment count mismatch: wanted {wanted}, got {got}")]
    FragmentCountMismatch { wanted: usize, got: usize },

    /// Fatal at init: the maximum fragment size must be a multiple of
    /// eight for the fragment-offset encoding.
    #[error("max fragment size {0} is not a multiple of 8")]
    BadFragmentSize(usize),

    /// A bounded table is at capacity.
    #[error("table at max capacity ({0})")]
    MaxCapacity(u64),
}
