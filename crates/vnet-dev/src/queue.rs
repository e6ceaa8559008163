//! Per-virtqueue state: the shadow ring, its buffer slots and the offset counters.
//!
//! Counters, in ring order:
//!
//! ```text
//! compl_off ≤ last_off ≤ sd_mbuf_off ≤ sd_mbuf_off + pend_sd_mbuf ≤ sd_desc_off ≤ sd_desc_off + pend_sd_desc
//! ```
//!
//! `sd_desc_off`/`pend_sd_desc` and `sd_mbuf_off`/`pend_sd_mbuf` live in [`OffsetCursor`]s so the
//! copy channel can advance them when the copies they describe finish.

use core::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tracing::error;
use vnet_buf::{BufferSource, PktBuf};
use vnet_dma::OffsetCursor;
use vnet_wire::offset::{self, INITIAL_OFF};
use vnet_wire::{PackedDesc, PackedDescEvent, ProtocolViolation};

use crate::hash::HashReportTable;
use crate::signal::PeerSignals;
use crate::transform::Batch4Decoder;

/// Whether shadow descriptors are checked against the ownership rules.
pub(crate) const DESC_CHECK: bool = cfg!(any(debug_assertions, feature = "desc-check"));

/// Which way packets flow through a queue. Even queue ids carry packets to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device → peer (the peer's receive queue).
    ToPeer,
    /// Peer → device (the peer's transmit queue).
    FromPeer,
}

impl Direction {
    pub fn of(qid: u16) -> Self {
        if qid % 2 == 0 {
            Self::ToPeer
        } else {
            Self::FromPeer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Unconfigured,
    /// Memory allocated, counters at their initial value.
    Enabled,
    /// Event suppression fetched and offload modes selected.
    DriverReady,
    /// Being torn down.
    Reset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub packets: u64,
    pub bytes: u64,
    pub drops: u64,
    /// Descriptors whose payload did not fit the segment budget of one copy.
    pub truncated: u64,
    pub alloc_failures: u64,
}

/// Snapshot of every counter of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOffsets {
    pub sd_desc_off: u16,
    pub pend_sd_desc: u16,
    pub sd_mbuf_off: u16,
    pub pend_sd_mbuf: u16,
    pub last_off: u16,
    pub compl_off: u16,
}

impl QueueOffsets {
    /// Checks the counter ordering, measuring every counter as a distance ahead of `compl_off`.
    pub fn is_ordered(&self, q_sz: u16) -> bool {
        let ahead = |off: u16| u32::from(offset::diff(off, self.compl_off, q_sz));
        let last = ahead(self.last_off);
        let mbuf = ahead(self.sd_mbuf_off);
        let mbuf_end = mbuf + u32::from(self.pend_sd_mbuf);
        let desc = ahead(self.sd_desc_off);
        let desc_end = desc + u32::from(self.pend_sd_desc);
        last <= mbuf && mbuf_end <= desc && desc_end <= u32::from(q_sz)
    }
}

pub(crate) struct QueueParams {
    pub qid: u16,
    pub dev_id: u16,
    pub q_sz: u16,
    pub desc_base: u64,
    pub driver_area: u64,
    pub headroom: u16,
    pub buf_len: u16,
    pub hdr_len: u16,
    pub auto_free: bool,
    pub signals: Arc<PeerSignals>,
    pub hash_report: Arc<HashReportTable>,
}

/// One virtqueue.
///
/// Metadata, the shadow descriptor block and the buffer slot block are three separate
/// allocations; slot `i` of `bufs` belongs to descriptor `i` of `descs`.
pub struct Queue {
    pub(crate) qid: u16,
    pub(crate) dev_id: u16,
    pub(crate) direction: Direction,
    pub(crate) q_sz: u16,
    pub(crate) desc_base: u64,
    pub(crate) driver_area: u64,
    pub(crate) headroom: u16,
    pub(crate) buf_len: u16,
    pub(crate) hdr_len: u16,
    pub(crate) auto_free: bool,
    pub(crate) decoder: Batch4Decoder,
    pub(crate) signals: Arc<PeerSignals>,
    pub(crate) hash_report: Arc<HashReportTable>,

    pub(crate) sd_desc: Arc<OffsetCursor>,
    pub(crate) sd_mbuf: Arc<OffsetCursor>,
    /// Published by the packet consumer, read by completion marking.
    pub(crate) last_off: AtomicU16,
    pub(crate) compl_off: u16,
    /// Write-back operation whose completion should raise the peer's interrupt.
    pub(crate) pend_compl: Option<u16>,
    /// Interrupt line wired to this queue, if the peer wants events.
    pub(crate) cb_intr: Option<usize>,
    pub(crate) driver_event: Option<PackedDescEvent>,
    pub(crate) state: QueueState,

    pub(crate) descs: Box<[PackedDesc]>,
    pub(crate) bufs: Box<[Option<PktBuf>]>,
    pub(crate) stats: QueueStats,
}

impl Queue {
    pub(crate) fn new(params: QueueParams) -> Self {
        let q_sz = params.q_sz;
        debug_assert!(offset::is_valid_ring_size(q_sz));
        Self {
            qid: params.qid,
            dev_id: params.dev_id,
            direction: Direction::of(params.qid),
            q_sz,
            desc_base: params.desc_base,
            driver_area: params.driver_area,
            headroom: params.headroom,
            buf_len: params.buf_len,
            hdr_len: params.hdr_len,
            auto_free: params.auto_free,
            decoder: Batch4Decoder::detect(),
            signals: params.signals,
            hash_report: params.hash_report,
            sd_desc: Arc::new(OffsetCursor::new(INITIAL_OFF)),
            sd_mbuf: Arc::new(OffsetCursor::new(INITIAL_OFF)),
            last_off: AtomicU16::new(INITIAL_OFF),
            compl_off: INITIAL_OFF,
            pend_compl: None,
            cb_intr: None,
            driver_event: None,
            state: QueueState::Enabled,
            descs: vec![PackedDesc::default(); usize::from(q_sz)].into_boxed_slice(),
            bufs: (0..q_sz).map(|_| None).collect(),
            stats: QueueStats::default(),
        }
    }

    pub fn qid(&self) -> u16 {
        self.qid
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn size(&self) -> u16 {
        self.q_sz
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn hdr_len(&self) -> u16 {
        self.hdr_len
    }

    pub fn driver_event(&self) -> Option<PackedDescEvent> {
        self.driver_event
    }

    pub fn offsets(&self) -> QueueOffsets {
        QueueOffsets {
            sd_desc_off: self.sd_desc.off(Ordering::Acquire),
            pend_sd_desc: self.sd_desc.pend(),
            sd_mbuf_off: self.sd_mbuf.off(Ordering::Acquire),
            pend_sd_mbuf: self.sd_mbuf.pend(),
            last_off: self.last_off.load(Ordering::Acquire),
            compl_off: self.compl_off,
        }
    }

    /// Offset the peer has published descriptors up to.
    #[inline]
    pub(crate) fn peer_next_off(&self) -> u16 {
        match self.signals.doorbell(self.qid) {
            Some(bell) => bell.next_off(),
            None => self.sd_desc.off(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn idx(&self, off: u16) -> usize {
        usize::from(offset::to_index(off, self.q_sz))
    }

    #[inline]
    pub(crate) fn desc_addr(&self, idx: usize) -> u64 {
        self.desc_base + (idx * vnet_wire::DESC_SIZE) as u64
    }

    #[inline]
    pub(crate) fn check_avail(&self, idx: usize, off: u16) {
        if DESC_CHECK {
            if let Err(violation) = self.descs[idx].validate_avail(off) {
                self.ring_corrupted(violation);
            }
        }
    }

    #[inline]
    pub(crate) fn check_consumed(&self, idx: usize, off: u16) {
        if DESC_CHECK {
            if let Err(violation) = self.descs[idx].validate_consumed(off) {
                self.ring_corrupted(violation);
            }
        }
    }

    #[cold]
    #[inline(never)]
    fn ring_corrupted(&self, violation: ProtocolViolation) -> ! {
        error!(dev = self.dev_id, queue = self.qid, %violation, "packed ring corrupted");
        panic!("dev {} queue {}: {violation}", self.dev_id, self.qid);
    }

    #[cold]
    #[inline(never)]
    pub(crate) fn missing_buffer(&self, idx: usize) -> ! {
        error!(dev = self.dev_id, queue = self.qid, slot = idx, "shadow slot has no buffer");
        panic!(
            "dev {} queue {}: shadow slot {idx} has no buffer",
            self.dev_id, self.qid
        );
    }

    /// Returns every buffer still parked in a slot to `source`.
    pub(crate) fn release_buffers(&mut self, source: &mut BufferSource) -> usize {
        let mut released = 0;
        for slot in self.bufs.iter_mut() {
            if let Some(buf) = slot.take() {
                source.put(buf);
                released += 1;
            }
        }
        released
    }
}

impl core::fmt::Debug for Queue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Queue")
            .field("qid", &self.qid)
            .field("direction", &self.direction)
            .field("q_sz", &self.q_sz)
            .field("state", &self.state)
            .field("offsets", &self.offsets())
            .finish_non_exhaustive()
    }
}
