// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The data-plane of a WiFi access-point virtual network function.
//!
//! This crate converts between wired Ethernet frames and over-the-air
//! IEEE 802.11 frames and runs CCMP (AES-CCM) encapsulation against an
//! asynchronous crypto offload engine. The engine itself, the tunnel
//! encapsulators, and the SA/key-lifecycle manager are external
//! collaborators; this crate owns the frame classification, the CCMP
//! AAD/nonce/header codec, the batch dispatch bookkeeping, and the
//! vAP-level fragmentation/reassembly.
//!
//! Nothing in here blocks: submission and retrieval are non-blocking
//! polls against the engine's queues, and a packet is owned by exactly
//! one worker from start to finish.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "engine", test))]
#[macro_use]
extern crate alloc;

#[cfg(any(feature = "engine", test))]
#[macro_use]
extern crate cfg_if;

#[cfg(any(feature = "api", test))]
pub mod api;
#[cfg(any(feature = "engine", test))]
pub mod buf;
#[cfg(any(feature = "engine", test))]
pub mod engine;
#[cfg(any(feature = "engine", test))]
pub mod time;
