// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Init-time configuration for the data-plane.
//!
//! Configuration is constructor-injected: every worker builds its own
//! dispatcher and reassembly table from these values. Nothing here is
//! read from an ambient source at runtime.

use core::num::NonZeroU32;
use serde::Deserialize;
use serde::Serialize;

/// Configuration for one worker's reassembly table.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct FragCfg {
    /// Number of concurrent partial reassemblies the table holds.
    pub capacity: NonZeroU32,

    /// How long a partial reassembly may sit incomplete before it is
    /// moved to the death row.
    pub ttl_millis: u64,

    /// Maximum payload bytes per fragment. Must be a multiple of 8;
    /// the fragment-offset encoding counts in 8-byte units.
    pub max_fragment_size: usize,
}

impl Default for FragCfg {
    fn default() -> Self {
        const CAPACITY: NonZeroU32 = NonZeroU32::new(256).unwrap();
        Self { capacity: CAPACITY, ttl_millis: 2_000, max_fragment_size: 1_024 }
    }
}

/// Configuration for one worker's crypto dispatcher.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct CryptoCfg {
    /// Number of crypto-operation descriptors in the worker's pool.
    /// Bounds the in-flight operations per queue pair.
    pub pool_capacity: usize,
}

impl Default for CryptoCfg {
    fn default() -> Self {
        Self { pool_capacity: 2_048 }
    }
}
