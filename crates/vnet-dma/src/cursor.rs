use core::sync::atomic::{AtomicU16, Ordering};

/// A ring offset paired with the number of slots whose copies are still in flight.
///
/// Stages of the shadow-ring pipeline issue copies with [`OffsetCursor::issue`]; the channel that
/// carries those copies later calls [`OffsetCursor::complete`] with the offset the stage reached.
#[derive(Debug)]
pub struct OffsetCursor {
    off: AtomicU16,
    pend: AtomicU16,
}

impl OffsetCursor {
    pub fn new(off: u16) -> Self {
        Self {
            off: AtomicU16::new(off),
            pend: AtomicU16::new(0),
        }
    }

    #[inline]
    pub fn off(&self, order: Ordering) -> u16 {
        self.off.load(order)
    }

    #[inline]
    pub fn pend(&self) -> u16 {
        self.pend.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn issue(&self, count: u16) {
        self.pend.fetch_add(count, Ordering::Relaxed);
    }

    /// Publishes `value` and retires `count` pending slots.
    ///
    /// The offset is stored before `pend` drops so a concurrent reader can only under-count.
    #[inline]
    pub fn complete(&self, value: u16, count: u16, order: Ordering) {
        self.off.store(value, order);
        self.pend.fetch_sub(count, Ordering::Relaxed);
    }

    pub fn reset(&self, off: u16) {
        self.off.store(off, Ordering::Release);
        self.pend.store(0, Ordering::Relaxed);
    }
}
