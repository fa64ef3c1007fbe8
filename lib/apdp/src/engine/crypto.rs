// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The async crypto dispatcher.
//!
//! Each worker owns one dispatcher: a bounded pool of crypto-operation
//! descriptors and a queue pair into the offload engine. A packet
//! moves Pending -> Submitted -> {Completed-Success,
//! Completed-Failure, Dropped-Before-Submit}; success is tracked per
//! packet, independent of what happens to the rest of its batch, and
//! a descriptor is recycled on every exit path.
//!
//! Nothing here blocks: a full submission queue accepts fewer packets
//! this call, and retrieval drains whatever has completed. There is no
//! cancellation — a submitted operation runs until the engine reports
//! it.

use crate::buf::PacketBuf;
use crate::engine::ccmp::Aad;
use crate::engine::ccmp::CCMP_HDR_LEN;
use crate::engine::ccmp::CCMP_NONCE_LEN;
use crate::engine::ccmp::build_aad;
use crate::engine::ccmp::build_nonce;
use crate::engine::ccmp::pn_from_header;
use crate::engine::dot11::FrameMeta;
use alloc::boxed::Box;
use alloc::vec::Vec;
use apdp_api::CryptoCfg;
use apdp_api::Direction;
use apdp_api::SecAssoc;
use apdp_api::SessionHandle;
use log::debug;
use log::warn;

/// The engine's verdict on one operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OpStatus {
    /// Not yet reported by the engine.
    #[default]
    NotProcessed,
    Success,
    Failure,
}

/// One in-flight crypto operation.
///
/// Ephemeral: taken from the pool at setup, returned to it as soon as
/// the engine reports the operation (or the submission fails). Owns
/// the source packet buffer and its metadata until then — the
/// back-reference the engine hands back on completion.
#[derive(Debug, Default)]
pub struct CryptoOp {
    pub session: Option<SessionHandle>,
    /// Offset of the ciphertext/plaintext region.
    pub data_off: usize,
    pub data_len: usize,
    /// Offset of the MIC within the buffer.
    pub digest_off: usize,
    pub aad: Aad,
    pub nonce: [u8; CCMP_NONCE_LEN],
    pub status: OpStatus,
    src: Option<(PacketBuf, FrameMeta)>,
}

impl CryptoOp {
    /// The source buffer, while this operation holds one.
    pub fn buffer(&self) -> Option<&PacketBuf> {
        self.src.as_ref().map(|(pkt, _)| pkt)
    }

    /// Mutable access for the engine to transform the payload and
    /// write the digest in place.
    pub fn buffer_mut(&mut self) -> Option<&mut PacketBuf> {
        self.src.as_mut().map(|(pkt, _)| pkt)
    }

    fn take_src(&mut self) -> Option<(PacketBuf, FrameMeta)> {
        self.src.take()
    }

    fn reset(&mut self) {
        self.session = None;
        self.data_off = 0;
        self.data_len = 0;
        self.digest_off = 0;
        self.aad.clear();
        self.nonce = [0; CCMP_NONCE_LEN];
        self.status = OpStatus::NotProcessed;
        self.src = None;
    }
}

/// The crypto offload engine, consumed as an external collaborator.
///
/// Both calls are non-blocking polls against the engine's queue pair.
pub trait CryptoEngine {
    /// Submit a contiguous batch. The engine drains the prefix it
    /// accepts from `ops` and returns its length; whatever it cannot
    /// take this call stays in `ops`.
    fn submit(&mut self, ops: &mut Vec<Box<CryptoOp>>) -> usize;

    /// Retrieve up to `capacity` completed operations, each with
    /// [`CryptoOp::status`] set.
    fn retrieve(&mut self, capacity: usize) -> Vec<Box<CryptoOp>>;
}

/// A bounded, recycling pool of descriptors.
struct OpPool {
    free: Vec<Box<CryptoOp>>,
}

impl OpPool {
    fn new(capacity: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        free.resize_with(capacity, Box::default);
        Self { free }
    }

    fn take(&mut self) -> Option<Box<CryptoOp>> {
        self.free.pop()
    }

    fn put(&mut self, mut op: Box<CryptoOp>) {
        op.reset();
        self.free.push(op);
    }
}

/// Counters for one dispatcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchStats {
    pub submitted: u64,
    pub completed: u64,
    pub completed_ok: u64,
    pub setup_failures: u64,
    pub engine_rejects: u64,
}

/// The outcome of one [`CryptoDispatch::enqueue_batch`] call.
///
/// `ok` holds exactly one flag per input packet — a packet is never
/// dropped without a corresponding `false`. Packets that failed setup
/// or were rejected by the engine come back in `returned`, tagged with
/// their input index; input order is preserved among the accepted.
#[derive(Debug)]
pub struct EnqueueOutcome {
    pub accepted: usize,
    pub ok: Vec<bool>,
    pub returned: Vec<(usize, PacketBuf, FrameMeta)>,
}

/// The outcome of one [`CryptoDispatch::dequeue_batch`] call.
#[derive(Debug)]
pub struct DequeueOutcome {
    /// Recovered packets in engine completion order, each with its
    /// per-operation verdict.
    pub completed: Vec<(PacketBuf, FrameMeta, bool)>,
    pub successes: usize,
}

/// Per-worker batch dispatch against one crypto engine queue pair.
pub struct CryptoDispatch<E: CryptoEngine> {
    engine: E,
    pool: OpPool,
    stats: DispatchStats,
}

impl<E: CryptoEngine> CryptoDispatch<E> {
    pub fn new(engine: E, cfg: &CryptoCfg) -> Self {
        Self {
            engine,
            pool: OpPool::new(cfg.pool_capacity),
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Set up and submit one batch of frames.
    ///
    /// Each frame gets a descriptor populated with its AAD, nonce,
    /// digest location, data region, and the SA session for
    /// (`dir`, AAD length). A frame whose setup fails — no session,
    /// pool dry, malformed lengths — is excluded and flagged without
    /// aborting the batch. The engine takes a prefix of the accepted
    /// batch; any unaccepted suffix is excised, flagged, and its
    /// descriptors recycled.
    pub fn enqueue_batch<S: SecAssoc>(
        &mut self,
        frames: Vec<(PacketBuf, FrameMeta)>,
        sas: &[&S],
        dir: Direction,
    ) -> EnqueueOutcome {
        let n = frames.len();
        let mut ok = vec![false; n];
        let mut returned = Vec::new();
        let mut ops: Vec<Box<CryptoOp>> = Vec::with_capacity(n);
        let mut op_idx: Vec<usize> = Vec::with_capacity(n);

        for (i, (pkt, meta)) in frames.into_iter().enumerate() {
            let Some(sa) = sas.get(i) else {
                self.stats.setup_failures += 1;
                returned.push((i, pkt, meta));
                continue;
            };

            match self.setup_op(pkt, meta, *sa, dir) {
                Ok(op) => {
                    ops.push(op);
                    op_idx.push(i);
                }
                Err((pkt, meta)) => {
                    self.stats.setup_failures += 1;
                    returned.push((i, pkt, meta));
                }
            }
        }

        let accepted = self.engine.submit(&mut ops);
        self.stats.submitted += accepted as u64;

        // `ops` now holds only the suffix the engine would not take.
        for (k, mut op) in ops.into_iter().enumerate() {
            let i = op_idx[accepted + k];
            self.stats.engine_rejects += 1;
            warn!("crypto engine rejected op for packet {i}");
            if let Some((pkt, meta)) = op.take_src() {
                returned.push((i, pkt, meta));
            }
            self.pool.put(op);
        }

        for &i in &op_idx[..accepted] {
            ok[i] = true;
        }

        EnqueueOutcome { accepted, ok, returned }
    }

    /// Retrieve up to `capacity` completed operations, recovering each
    /// source buffer and recycling every descriptor regardless of its
    /// verdict.
    pub fn dequeue_batch(&mut self, capacity: usize) -> DequeueOutcome {
        let done = self.engine.retrieve(capacity);
        let mut completed = Vec::with_capacity(done.len());
        let mut successes = 0;

        for mut op in done {
            let success = op.status == OpStatus::Success;
            if let Some((pkt, meta)) = op.take_src() {
                if success {
                    successes += 1;
                } else {
                    debug!("crypto op failed for pn {}", meta.pn);
                }
                completed.push((pkt, meta, success));
            }
            self.pool.put(op);
        }

        self.stats.completed += completed.len() as u64;
        self.stats.completed_ok += successes as u64;
        DequeueOutcome { completed, successes }
    }

    /// Populate a descriptor for one frame, handing the frame back on
    /// any failure.
    fn setup_op<S: SecAssoc>(
        &mut self,
        pkt: PacketBuf,
        meta: FrameMeta,
        sa: &S,
        dir: Direction,
    ) -> Result<Box<CryptoOp>, (PacketBuf, FrameMeta)> {
        let mic_len = sa.mic_len();
        let data_off = meta.hdr_len + CCMP_HDR_LEN;

        if pkt.len() < data_off + mic_len {
            debug!(
                "frame too short for crypto setup: {} < {}",
                pkt.len(),
                data_off + mic_len
            );
            return Err((pkt, meta));
        }

        let aad = match build_aad(&pkt, &meta) {
            Ok(aad) => aad,
            Err(e) => {
                debug!("AAD construction failed: {e}");
                return Err((pkt, meta));
            }
        };

        let pn = match dir {
            Direction::Out => Ok(meta.pn),
            Direction::In => pn_from_header(&pkt[meta.hdr_len..data_off]),
        };
        let nonce = match pn.and_then(|pn| build_nonce(&pkt, &meta, pn)) {
            Ok(nonce) => nonce,
            Err(e) => {
                debug!("nonce construction failed: {e}");
                return Err((pkt, meta));
            }
        };

        let Some(session) = sa.session_for(dir, aad.len()) else {
            debug!("no session for {dir}/aad {}", aad.len());
            return Err((pkt, meta));
        };

        let Some(mut op) = self.pool.take() else {
            debug!("crypto op pool dry");
            return Err((pkt, meta));
        };

        op.session = Some(session);
        op.data_off = data_off;
        op.data_len = pkt.len() - data_off - mic_len;
        op.digest_off = pkt.len() - mic_len;
        op.aad = aad;
        op.nonce = nonce;
        op.status = OpStatus::NotProcessed;
        op.src = Some((pkt, meta));

        Ok(op)
    }
}

cfg_if! {
    if #[cfg(any(feature = "test-help", test))] {
        use apdp_api::PnCounter;

        /// An SA with a fixed key and one session per
        /// (direction, AAD length), for testing.
        #[derive(Debug)]
        pub struct FixedSa {
            pub key_len: usize,
            pub key_id: u8,
            /// AAD lengths for which `session_for` reports no session.
            pub missing_aad_lens: alloc::vec::Vec<usize>,
            pub tx_pn: PnCounter,
            pub rx_pn: PnCounter,
        }

        impl FixedSa {
            /// A CCMP-128 SA: 16-byte key, 8-byte MIC.
            pub fn ccmp128() -> Self {
                Self {
                    key_len: 16,
                    key_id: 0,
                    missing_aad_lens: alloc::vec::Vec::new(),
                    tx_pn: PnCounter::transmit(),
                    rx_pn: PnCounter::receive(),
                }
            }
        }

        impl SecAssoc for FixedSa {
            fn key_len(&self) -> usize {
                self.key_len
            }

            fn key_id(&self) -> u8 {
                self.key_id
            }

            fn session_for(
                &self,
                dir: Direction,
                aad_len: usize,
            ) -> Option<SessionHandle> {
                if self.missing_aad_lens.contains(&aad_len) {
                    return None;
                }
                Some(SessionHandle::new(
                    (dir as u64) << 32 | aad_len as u64,
                ))
            }
        }

        /// A software stand-in for the offload engine: a bounded FIFO
        /// that completes operations on retrieval. The payload is left
        /// alone; the digest region is filled with a marker so tests
        /// can see the engine wrote where it was told to.
        #[derive(Debug, Default)]
        pub struct LoopbackCryptoEngine {
            queue: alloc::collections::VecDeque<Box<CryptoOp>>,
            queue_capacity: usize,
            /// Complete this many upcoming operations as failures.
            pub fail_next: usize,
        }

        /// The byte the loopback engine writes across digest regions.
        pub const LOOPBACK_DIGEST_MARKER: u8 = 0xA5;

        impl LoopbackCryptoEngine {
            pub fn new(queue_capacity: usize) -> Self {
                Self {
                    queue: alloc::collections::VecDeque::new(),
                    queue_capacity,
                    fail_next: 0,
                }
            }

            pub fn in_flight(&self) -> usize {
                self.queue.len()
            }
        }

        impl CryptoEngine for LoopbackCryptoEngine {
            fn submit(&mut self, ops: &mut Vec<Box<CryptoOp>>) -> usize {
                let room = self.queue_capacity - self.queue.len();
                let n = ops.len().min(room);
                self.queue.extend(ops.drain(..n));
                n
            }

            fn retrieve(&mut self, capacity: usize) -> Vec<Box<CryptoOp>> {
                let n = self.queue.len().min(capacity);
                let mut out = Vec::with_capacity(n);
                for _ in 0..n {
                    // Unwrap safety: bounded by the queue length above.
                    let mut op = self.queue.pop_front().unwrap();
                    if self.fail_next > 0 {
                        self.fail_next -= 1;
                        op.status = OpStatus::Failure;
                    } else {
                        let digest_off = op.digest_off;
                        if let Some(pkt) = op.buffer_mut() {
                            pkt[digest_off..]
                                .fill(LOOPBACK_DIGEST_MARKER);
                        }
                        op.status = OpStatus::Success;
                    }
                    out.push(op);
                }
                out
            }
        }
    }
}
