// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use alloc::str::FromStr;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use serde::Deserialize;
use serde::Serialize;

/// A MAC address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Hash,
)]
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: Self = Self { inner: [0xFF; 6] };
    pub const ZERO: Self = Self { inner: [0x00; 6] };

    /// Return the bytes of the MAC address.
    #[inline]
    pub fn bytes(&self) -> [u8; 6] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }

    /// Is the group bit set? Broadcast and multicast destinations get
    /// no QoS-control field when a frame is built for the air.
    #[inline]
    pub fn is_multicast(&self) -> bool {
        self.inner[0] & 0x01 != 0
    }

    #[inline]
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl From<&[u8; 6]> for MacAddr {
    fn from(bytes: &[u8; 6]) -> Self {
        Self { inner: *bytes }
    }
}

impl AsRef<[u8]> for MacAddr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for MacAddr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets = s
            .split(':')
            .map(|s| {
                u8::from_str_radix(s, 16).map_err(|_| format!("bad octet: {s}"))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        let inner: [u8; 6] = octets
            .try_into()
            .map_err(|v: Vec<u8>| {
                format!("incorrect number of bytes: {}", v.len())
            })?;

        Ok(MacAddr { inner })
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.inner[0],
            self.inner[1],
            self.inner[2],
            self.inner[3],
            self.inner[4],
            self.inner[5]
        )
    }
}

// There's no reason to view the MAC address as its raw array, so just
// present it in a human-friendly manner.
impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr {{ inner: {self} }}")
    }
}
