use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, warn};

use crate::{CopyEngine, CopyError, OffsetCursor};

/// Scatter-gather elements one engine operation can carry on each side.
pub const MAX_POINTERS: usize = 15;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VchanStats {
    pub ops_submitted: u64,
    pub ops_completed: u64,
    pub copies: u64,
    pub bytes: u64,
    pub busy: u64,
    pub errors: u64,
}

#[derive(Debug)]
struct CompletionMeta {
    op: u16,
    cursor: Arc<OffsetCursor>,
    value: u16,
    count: u16,
}

/// One direction of copies (device → memory or memory → device) on one engine.
///
/// Copies are staged into the operation currently being built. [`VirtualChannel::flush`] submits
/// that operation only when the pointer lists cannot take the next unit of work, so many small
/// copies share one submission. Operations are numbered with a wrapping `u16`; `tail` is the
/// number of the operation being built and `head` the number of operations completed.
pub struct VirtualChannel {
    id: u16,
    engine: Box<dyn CopyEngine + Send>,
    src_i: usize,
    dst_i: usize,
    tail: u16,
    head: u16,
    metas: VecDeque<CompletionMeta>,
    read_cursor: Option<u64>,
    stats: VchanStats,
}

impl VirtualChannel {
    pub fn new(id: u16, engine: Box<dyn CopyEngine + Send>) -> Self {
        Self {
            id,
            engine,
            src_i: 0,
            dst_i: 0,
            tail: 0,
            head: 0,
            metas: VecDeque::new(),
            read_cursor: None,
            stats: VchanStats::default(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn stats(&self) -> VchanStats {
        self.stats
    }

    /// Pointer-list slots still free in the operation being built.
    #[inline]
    pub fn free_slots(&self) -> usize {
        MAX_POINTERS - self.src_i.max(self.dst_i)
    }

    /// Number of the operation currently being built.
    #[inline]
    pub fn tail(&self) -> u16 {
        self.tail
    }

    /// Operations submitted but not yet completed.
    #[inline]
    pub fn in_flight(&self) -> u16 {
        self.tail.wrapping_sub(self.head)
    }

    /// Whether copies are staged but not yet submitted.
    #[inline]
    pub fn has_staged(&self) -> bool {
        self.src_i != 0 || self.dst_i != 0
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0 && !self.has_staged()
    }

    /// Whether operation `op` has completed.
    #[inline]
    pub fn op_status(&self, op: u16) -> bool {
        (self.head.wrapping_sub(op) as i16) > 0
    }

    /// Makes room for `min_free` more pointers, submitting the staged operation if needed.
    ///
    /// Returns `false` when the engine refused the submission; the caller should stop and retry on
    /// a later poll.
    pub fn flush(&mut self, min_free: usize) -> bool {
        debug_assert!(min_free <= MAX_POINTERS);
        if self.free_slots() >= min_free {
            return true;
        }
        self.submit_pending()
    }

    /// Submits whatever is staged.
    pub fn submit_pending(&mut self) -> bool {
        if !self.has_staged() {
            return true;
        }
        match self.engine.submit() {
            Ok(()) => {
                self.tail = self.tail.wrapping_add(1);
                self.src_i = 0;
                self.dst_i = 0;
                self.read_cursor = None;
                self.stats.ops_submitted += 1;
                true
            }
            Err(CopyError::Busy) => {
                self.stats.busy += 1;
                false
            }
            Err(err) => {
                self.stats.errors += 1;
                warn!(vchan = self.id, %err, "copy submission failed");
                false
            }
        }
    }

    fn staging_fault(&mut self, err: CopyError) {
        self.stats.errors += 1;
        error!(vchan = self.id, %err, "copy staging failed");
    }

    /// Stages a remote → local copy of `dst.len()` bytes from `src`.
    pub fn enqueue_read(&mut self, src: u64, dst: &mut [u8]) {
        debug_assert!(self.free_slots() >= 1);
        if let Err(err) = self.engine.read(src, dst) {
            self.staging_fault(err);
        }
        self.src_i += 1;
        self.dst_i += 1;
        self.read_cursor = Some(src + dst.len() as u64);
        self.stats.copies += 1;
        self.stats.bytes += dst.len() as u64;
    }

    /// Adds another destination to the source extent of the previous read.
    pub fn enqueue_read_dst(&mut self, dst: &mut [u8]) {
        debug_assert!(self.dst_i < MAX_POINTERS);
        let Some(src) = self.read_cursor else {
            self.staging_fault(CopyError::Transfer);
            return;
        };
        if let Err(err) = self.engine.read(src, dst) {
            self.staging_fault(err);
        }
        self.dst_i += 1;
        self.read_cursor = Some(src + dst.len() as u64);
        self.stats.bytes += dst.len() as u64;
    }

    /// Stages a local → remote copy of `src` to `dst`.
    pub fn enqueue_write(&mut self, src: &[u8], dst: u64) {
        debug_assert!(self.free_slots() >= 1);
        if let Err(err) = self.engine.write(src, dst) {
            self.staging_fault(err);
        }
        self.src_i += 1;
        self.dst_i += 1;
        self.read_cursor = None;
        self.stats.copies += 1;
        self.stats.bytes += src.len() as u64;
    }

    /// Records that, once the operation being built completes, `cursor` reaches `value` and
    /// `count` of its pending slots retire.
    pub fn record(&mut self, cursor: &Arc<OffsetCursor>, value: u16, count: u16) {
        self.record_for(self.tail, cursor, value, count);
    }

    /// Like [`VirtualChannel::record`], for operation `op`, which may already be submitted.
    ///
    /// Recorded operations must not go backwards across calls.
    pub fn record_for(&mut self, op: u16, cursor: &Arc<OffsetCursor>, value: u16, count: u16) {
        debug_assert!((self.tail.wrapping_sub(op) as i16) >= 0);
        self.metas.push_back(CompletionMeta {
            op,
            cursor: Arc::clone(cursor),
            value,
            count,
        });
    }

    /// Collects completed operations and applies their cursor updates.
    ///
    /// With `atomic` the offsets are published with release ordering for readers on other
    /// workers.
    pub fn poll(&mut self, atomic: bool) -> u16 {
        let done = match self.engine.completed() {
            Ok(done) => done,
            Err(err) => {
                self.stats.errors += 1;
                error!(vchan = self.id, %err, "copy completion reported an error");
                return 0;
            }
        };
        self.head = self.head.wrapping_add(done);
        self.stats.ops_completed += u64::from(done);

        let order = if atomic {
            Ordering::Release
        } else {
            Ordering::Relaxed
        };
        while let Some(meta) = self.metas.front() {
            if !self.op_status(meta.op) {
                break;
            }
            meta.cursor.complete(meta.value, meta.count, order);
            self.metas.pop_front();
        }
        done
    }
}

impl core::fmt::Debug for VirtualChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VirtualChannel")
            .field("id", &self.id)
            .field("src_i", &self.src_i)
            .field("dst_i", &self.dst_i)
            .field("tail", &self.tail)
            .field("head", &self.head)
            .field("pending_metas", &self.metas.len())
            .finish_non_exhaustive()
    }
}
