// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The data-plane engine.
//!
//! All code under this namespace is guarded by the `engine` feature
//! flag.
pub mod ccmp;
pub mod crypto;
pub mod dot11;
pub mod ether;
pub mod frag;

pub use apdp_api::Direction;
