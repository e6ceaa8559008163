use std::time::Duration;

use vnet_wire::offset;

use crate::{NetDevError, Result};

/// Link state reported to the peer through the device config space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub up: bool,
    /// Mbit/s; `u32::MAX` means unknown.
    pub speed_mbps: u32,
    pub full_duplex: bool,
}

impl Default for LinkInfo {
    fn default() -> Self {
        Self {
            up: true,
            speed_mbps: u32::MAX,
            full_duplex: true,
        }
    }
}

/// Retry budget for the few copies that bring-up paths wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtrlPollBudget {
    pub polls: u32,
    /// Sleep between polls. Zero spins.
    pub interval: Duration,
}

impl Default for CtrlPollBudget {
    fn default() -> Self {
        Self {
            polls: 1000,
            interval: Duration::from_micros(10),
        }
    }
}

/// Device-wide configuration, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDevConfig {
    /// Copy channel pair every queue of the device uses.
    pub dma_vchan: u16,
    /// Release transmitted buffers as soon as their payload copy is staged.
    pub auto_free: bool,
    /// Offer checksum and segmentation offloads.
    pub csum_offload: bool,
    /// Offered MTU; 0 leaves `VIRTIO_NET_F_MTU` out.
    pub mtu: u16,
    pub mac: [u8; 6],
    pub max_queue_pairs: u16,
    /// RSS indirection table size; 0 leaves RSS and hash reporting out.
    pub reta_size: u16,
    pub hash_key_size: u8,
    pub link: LinkInfo,
    pub ctrl_poll: CtrlPollBudget,
}

impl Default for NetDevConfig {
    fn default() -> Self {
        Self {
            dma_vchan: 0,
            auto_free: true,
            csum_offload: true,
            mtu: 1500,
            mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            max_queue_pairs: 1,
            reta_size: 0,
            hash_key_size: 40,
            link: LinkInfo::default(),
            ctrl_poll: CtrlPollBudget::default(),
        }
    }
}

impl NetDevConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_pairs == 0 {
            return Err(NetDevError::InvalidConfig("max_queue_pairs must be at least 1"));
        }
        // Data queues plus the control queue must fit the 16-bit queue id space.
        if self.max_queue_pairs > 0x7fff {
            return Err(NetDevError::InvalidConfig("max_queue_pairs exceeds 32767"));
        }
        if self.reta_size != 0 && !self.reta_size.is_power_of_two() {
            return Err(NetDevError::InvalidConfig("reta_size must be a power of two"));
        }
        if self.ctrl_poll.polls == 0 {
            return Err(NetDevError::InvalidConfig("ctrl_poll.polls must be non-zero"));
        }
        Ok(())
    }

    /// Number of data queues (both directions of every pair).
    pub fn data_queues(&self) -> u16 {
        self.max_queue_pairs * 2
    }
}

/// Per-queue parameters programmed by the peer through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConf {
    pub size: u16,
    /// Remote address of the descriptor ring.
    pub desc_addr: u64,
    /// Remote address of the driver event-suppression record.
    pub driver_area: u64,
    pub enable: bool,
}

impl QueueConf {
    pub fn new(size: u16, desc_addr: u64, driver_area: u64) -> Self {
        Self {
            size,
            desc_addr,
            driver_area,
            enable: true,
        }
    }

    pub(crate) fn validate(&self, qid: u16) -> Result<()> {
        if !offset::is_valid_ring_size(self.size) {
            return Err(NetDevError::InvalidQueueSize {
                qid,
                size: self.size,
            });
        }
        Ok(())
    }
}
