//! Words shared with the peer's notification machinery.
//!
//! The peer publishes how far it has filled each ring by writing a doorbell word; the device
//! signals completions back by writing a per-queue notify flag and an interrupt line. Delivery of
//! those writes across domains is someone else's job, so every access here is relaxed.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use vnet_wire::offset::INITIAL_OFF;

/// Value written to an interrupt line to raise it.
pub const INTR_RAISE: u64 = 1 << 59;

/// ISR bit announcing a config-space (link) change.
pub const ISR_CONFIG_CHANGE: u8 = 0x2;

/// Doorbell of one virtqueue.
#[derive(Debug)]
pub struct QueueDoorbell {
    /// `next_off << 16 | qid`, as written by the peer.
    notify: AtomicU32,
    cb_notify: AtomicU32,
}

impl QueueDoorbell {
    fn new(qid: u16) -> Self {
        Self {
            notify: AtomicU32::new(u32::from(INITIAL_OFF) << 16 | u32::from(qid)),
            cb_notify: AtomicU32::new(0),
        }
    }

    /// Peer side: announce that descriptors up to `next_off` are available.
    pub fn publish(&self, qid: u16, next_off: u16) {
        self.notify
            .store(u32::from(next_off) << 16 | u32::from(qid), Ordering::Relaxed);
    }

    /// Offset the peer has filled the ring up to, wrap bit included.
    #[inline]
    pub fn next_off(&self) -> u16 {
        (self.notify.load(Ordering::Relaxed) >> 16) as u16
    }

    #[inline]
    pub fn cb_notify(&self) -> u32 {
        self.cb_notify.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_cb_notify(&self, value: u32) {
        self.cb_notify.store(value, Ordering::Relaxed);
    }
}

/// One peer interrupt line.
#[derive(Debug, Default)]
pub struct InterruptLine(AtomicU64);

impl InterruptLine {
    #[inline]
    pub fn raise(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Peer side: read and clear.
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }

    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Every notification word of one device.
#[derive(Debug)]
pub struct PeerSignals {
    doorbells: Box<[QueueDoorbell]>,
    intrs: Box<[InterruptLine]>,
    isr: AtomicU8,
}

impl PeerSignals {
    pub fn new(nb_queues: u16, nb_intrs: u16) -> Arc<Self> {
        Arc::new(Self {
            doorbells: (0..nb_queues).map(QueueDoorbell::new).collect(),
            intrs: (0..nb_intrs).map(|_| InterruptLine::default()).collect(),
            isr: AtomicU8::new(0),
        })
    }

    pub fn doorbell(&self, qid: u16) -> Option<&QueueDoorbell> {
        self.doorbells.get(usize::from(qid))
    }

    pub fn nb_queues(&self) -> u16 {
        self.doorbells.len() as u16
    }

    pub fn intr(&self, idx: usize) -> Option<&InterruptLine> {
        self.intrs.get(idx)
    }

    pub fn nb_intrs(&self) -> usize {
        self.intrs.len()
    }

    pub fn set_isr(&self, bits: u8) {
        self.isr.fetch_or(bits, Ordering::Relaxed);
    }

    /// Peer side: read and clear the ISR byte.
    pub fn take_isr(&self) -> u8 {
        self.isr.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doorbell_carries_offset_in_high_half() {
        let signals = PeerSignals::new(2, 1);
        let bell = signals.doorbell(1).unwrap();
        assert_eq!(bell.next_off(), INITIAL_OFF);
        bell.publish(1, 0x0004);
        assert_eq!(bell.next_off(), 0x0004);
        assert!(signals.doorbell(2).is_none());
    }

    #[test]
    fn interrupt_take_clears() {
        let signals = PeerSignals::new(0, 2);
        signals.intr(1).unwrap().raise(INTR_RAISE);
        assert_eq!(signals.intr(1).unwrap().take(), INTR_RAISE);
        assert_eq!(signals.intr(1).unwrap().peek(), 0);
        signals.set_isr(ISR_CONFIG_CHANGE);
        assert_eq!(signals.take_isr(), ISR_CONFIG_CHANGE);
        assert_eq!(signals.take_isr(), 0);
    }
}
