//! Offload-mode dispatch.
//!
//! Every combination of negotiated offloads gets its own monomorphized copy of the dequeue,
//! enqueue and descriptor-management paths. The mode bits are a `u8` const generic; inside the
//! paths `has(F, BIT)` folds to a constant, so a hot loop never looks at feature words. The device
//! picks one entry of each table when the driver reaches DRIVER_OK.

use bitflags::bitflags;
use vnet_buf::{BufferSource, PktBuf};
use vnet_dma::VirtualChannel;
use vnet_wire::features::{
    VIRTIO_F_IN_ORDER, VIRTIO_NET_F_CSUM, VIRTIO_NET_F_GUEST_CSUM, VIRTIO_NET_F_HASH_REPORT,
    VIRTIO_NET_F_HOST_TSO4, VIRTIO_NET_F_HOST_TSO6, VIRTIO_NET_F_MRG_RXBUF,
};

use crate::dma::VchanPair;
use crate::queue::Queue;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeqMode: u8 {
        const CSUM = 1 << 0;
        const OUT_OF_ORDER = 1 << 1;
        const GSO = 1 << 2;
        const EXTBUF = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnqMode: u8 {
        const NO_AUTO_FREE = 1 << 0;
        const CSUM = 1 << 1;
        const MSEG = 1 << 2;
        const HASH_REPORT = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MgmtMode: u8 {
        const OUT_OF_ORDER = 1 << 0;
        const MSEG = 1 << 1;
        const EXTBUF = 1 << 2;
    }
}

#[inline(always)]
pub(crate) const fn has(flags: u8, bit: u8) -> bool {
    flags & bit != 0
}

pub type DequeueFn =
    fn(&mut Queue, &mut BufferSource, &mut VirtualChannel, &mut Vec<PktBuf>, u16) -> u16;
pub type EnqueueFn = fn(&mut Queue, &mut BufferSource, &mut VirtualChannel, &mut Vec<PktBuf>) -> u16;
pub type MgmtFn = fn(&mut [Option<Queue>], &mut BufferSource, &mut VchanPair, u16);

pub struct DequeueStrategy {
    pub name: &'static str,
    pub mode: DeqMode,
    pub run: DequeueFn,
}

pub struct EnqueueStrategy {
    pub name: &'static str,
    pub mode: EnqMode,
    pub run: EnqueueFn,
}

pub struct MgmtStrategy {
    pub name: &'static str,
    pub mode: MgmtMode,
    pub run: MgmtFn,
}

macro_rules! impl_strategy_debug {
    ($($ty:ty),*) => {$(
        impl core::fmt::Debug for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("name", &self.name)
                    .field("mode", &self.mode)
                    .finish_non_exhaustive()
            }
        }
    )*};
}

impl_strategy_debug!(DequeueStrategy, EnqueueStrategy, MgmtStrategy);

macro_rules! dequeue_table {
    ($($n:literal)*) => {
        [$(DequeueStrategy {
            name: concat!("dequeue_", stringify!($n)),
            mode: DeqMode::from_bits_truncate($n),
            run: crate::deq::dequeue::<$n>,
        },)*]
    };
}

macro_rules! enqueue_table {
    ($($n:literal)*) => {
        [$(EnqueueStrategy {
            name: concat!("enqueue_", stringify!($n)),
            mode: EnqMode::from_bits_truncate($n),
            run: crate::enq::enqueue::<$n>,
        },)*]
    };
}

macro_rules! mgmt_table {
    ($($n:literal)*) => {
        [$(MgmtStrategy {
            name: concat!("desc_manage_", stringify!($n)),
            mode: MgmtMode::from_bits_truncate($n),
            run: crate::manage::desc_manage::<$n>,
        },)*]
    };
}

pub static DEQUEUE_TABLE: [DequeueStrategy; 16] =
    dequeue_table!(0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15);
pub static ENQUEUE_TABLE: [EnqueueStrategy; 16] =
    enqueue_table!(0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15);
pub static MGMT_TABLE: [MgmtStrategy; 8] = mgmt_table!(0 1 2 3 4 5 6 7);

/// The three paths a device runs with, chosen once per DRIVER_OK.
#[derive(Debug, Clone, Copy)]
pub struct ModeSelection {
    pub deq: &'static DequeueStrategy,
    pub enq: &'static EnqueueStrategy,
    pub mgmt: &'static MgmtStrategy,
}

impl ModeSelection {
    pub fn from_features(features: u64, auto_free: bool, external: bool) -> Self {
        let (deq, enq, mgmt) = Self::modes(features, auto_free, external);
        Self {
            deq: &DEQUEUE_TABLE[usize::from(deq.bits())],
            enq: &ENQUEUE_TABLE[usize::from(enq.bits())],
            mgmt: &MGMT_TABLE[usize::from(mgmt.bits())],
        }
    }

    pub fn modes(features: u64, auto_free: bool, external: bool) -> (DeqMode, EnqMode, MgmtMode) {
        let mut deq = DeqMode::empty();
        let mut enq = EnqMode::empty();
        let mut mgmt = MgmtMode::empty();
        let on = |feature| vnet_wire::features::has(features, feature);

        if on(VIRTIO_NET_F_CSUM) {
            deq |= DeqMode::CSUM;
            if on(VIRTIO_NET_F_HOST_TSO4) || on(VIRTIO_NET_F_HOST_TSO6) {
                deq |= DeqMode::GSO;
            }
        }
        if !on(VIRTIO_F_IN_ORDER) {
            deq |= DeqMode::OUT_OF_ORDER;
            mgmt |= MgmtMode::OUT_OF_ORDER;
        }
        if external {
            deq |= DeqMode::EXTBUF;
            mgmt |= MgmtMode::EXTBUF;
        }

        if !auto_free {
            enq |= EnqMode::NO_AUTO_FREE;
        }
        if on(VIRTIO_NET_F_GUEST_CSUM) {
            enq |= EnqMode::CSUM;
        }
        if on(VIRTIO_NET_F_MRG_RXBUF) {
            enq |= EnqMode::MSEG;
            mgmt |= MgmtMode::MSEG;
        }
        if on(VIRTIO_NET_F_HASH_REPORT) {
            enq |= EnqMode::HASH_REPORT;
        }
        (deq, enq, mgmt)
    }
}

impl Default for ModeSelection {
    /// Mode used before DRIVER_OK: no offloads, in order, pool buffers.
    fn default() -> Self {
        Self {
            deq: &DEQUEUE_TABLE[0],
            enq: &ENQUEUE_TABLE[0],
            mgmt: &MGMT_TABLE[0],
        }
    }
}
