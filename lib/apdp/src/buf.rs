// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The packet buffer.
//!
//! A [`PacketBuf`] is a single contiguous allocation with a movable
//! read window: bytes ahead of the window are head-room, bytes behind
//! it are tail-room. Headers are prepended by growing the window at
//! the front and trailers by growing it at the back; neither moves the
//! payload. A buffer is exclusively owned by whichever pipeline stage
//! currently holds it and is transferred, never shared.
//!
//! Every grow/shrink validates capacity before mutating, so a failed
//! call leaves the buffer exactly as it was.

use alloc::vec::Vec;
use apdp_api::ApdpError;
use core::ops::Deref;
use core::ops::DerefMut;

/// An error manipulating the read window of a [`PacketBuf`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BufError {
    #[error("not enough headroom: available {available}, needed {needed}")]
    NotEnoughHeadroom { available: usize, needed: usize },

    #[error("not enough tailroom: available {available}, needed {needed}")]
    NotEnoughTailroom { available: usize, needed: usize },

    /// Attempt to move the start of the window past its end.
    #[error("cannot drop {requested} bytes from a {len} byte buffer")]
    StartPastEnd { len: usize, requested: usize },

    /// Attempt to move the end of the window before its start.
    #[error("cannot trim {requested} bytes from a {len} byte buffer")]
    EndBeforeStart { len: usize, requested: usize },
}

impl From<BufError> for ApdpError {
    fn from(e: BufError) -> Self {
        match e {
            BufError::NotEnoughHeadroom { available, needed }
            | BufError::NotEnoughTailroom { available, needed } => {
                ApdpError::BufferCapacityExceeded { available, needed }
            }
            BufError::StartPastEnd { len, requested }
            | BufError::EndBeforeStart { len, requested } => {
                ApdpError::BufferCapacityExceeded {
                    available: len,
                    needed: requested,
                }
            }
        }
    }
}

pub type BufResult<T> = core::result::Result<T, BufError>;

/// A mutable packet buffer with independently tracked head and tail
/// room.
#[derive(Clone, Debug)]
pub struct PacketBuf {
    data: Vec<u8>,
    head: usize,
    tail: usize,
}

impl Deref for PacketBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data[self.head..self.tail]
    }
}

impl DerefMut for PacketBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data[self.head..self.tail]
    }
}

impl PacketBuf {
    /// Allocate a buffer with `head_len` bytes of head-room and
    /// capacity for `body_len` bytes behind it. The read window starts
    /// empty.
    pub fn new_with_headroom(head_len: usize, body_len: usize) -> Self {
        Self { data: vec![0; head_len + body_len], head: head_len, tail: head_len }
    }

    /// Allocate a buffer of exactly `buf.len()` bytes, copying its
    /// contents. No head or tail room.
    pub fn copy(buf: impl AsRef<[u8]>) -> Self {
        Self::copy_with_headroom(0, buf)
    }

    /// Allocate a buffer holding a copy of `buf` with `head_len` bytes
    /// of head-room ahead of it.
    pub fn copy_with_headroom(head_len: usize, buf: impl AsRef<[u8]>) -> Self {
        let src = buf.as_ref();
        let mut data = vec![0; head_len + src.len()];
        data[head_len..].copy_from_slice(src);
        Self { data, head: head_len, tail: head_len + src.len() }
    }

    /// The number of readable bytes in the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Bytes available for prepending ahead of the window.
    #[inline]
    pub fn head_capacity(&self) -> usize {
        self.head
    }

    /// Bytes available for appending behind the window.
    #[inline]
    pub fn tail_capacity(&self) -> usize {
        self.data.len() - self.tail
    }

    /// Grow the window at the front by `n` zeroed bytes.
    pub fn expand_front(&mut self, n: usize) -> BufResult<()> {
        if n > self.head {
            return Err(BufError::NotEnoughHeadroom {
                available: self.head,
                needed: n,
            });
        }

        self.head -= n;
        self.data[self.head..self.head + n].fill(0);
        Ok(())
    }

    /// Shrink the window at the front by `n`, removing bytes from the
    /// start of the packet.
    pub fn drop_front_bytes(&mut self, n: usize) -> BufResult<()> {
        if n > self.len() {
            return Err(BufError::StartPastEnd { len: self.len(), requested: n });
        }

        self.head += n;
        Ok(())
    }

    /// Grow the window at the back by `n` zeroed bytes.
    pub fn append_zeroed(&mut self, n: usize) -> BufResult<()> {
        if n > self.tail_capacity() {
            return Err(BufError::NotEnoughTailroom {
                available: self.tail_capacity(),
                needed: n,
            });
        }

        self.data[self.tail..self.tail + n].fill(0);
        self.tail += n;
        Ok(())
    }

    /// Append a copy of `bytes` at the back of the window.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> BufResult<()> {
        let n = bytes.len();
        self.append_zeroed(n)?;
        self.data[self.tail - n..self.tail].copy_from_slice(bytes);
        Ok(())
    }

    /// Shrink the window at the back by `n`, removing a trailer.
    pub fn trim_back(&mut self, n: usize) -> BufResult<()> {
        if n > self.len() {
            return Err(BufError::EndBeforeStart {
                len: self.len(),
                requested: n,
            });
        }

        self.tail -= n;
        Ok(())
    }
}
