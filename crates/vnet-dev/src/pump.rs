//! Per-tick glue between a [`NetDev`] and a host [`PacketBackend`].
//!
//! One tick, in order:
//! 1. Descriptor management: fetch what the peer published, complete what was consumed.
//! 2. Drain peer → host packets from every active transmit queue into the backend, within the
//!    transmit budget.
//! 3. Pull host → peer frames from the backend and enqueue them on queue 0, within the receive
//!    budget. Frames the ring cannot take yet are kept for the next tick.
//! 4. Submit everything staged on the worker's channels.

use tracing::debug;
use vnet_buf::PktBuf;

use crate::backend::PacketBackend;
use crate::dma::DmaChannels;
use crate::{NetDev, Result};

/// Default frame budget for each direction per tick.
pub const DEFAULT_MAX_FRAMES_PER_TICK: u16 = 256;

/// Number of frames pumped in each direction during a tick.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpCounts {
    /// Peer → host frames handed to [`PacketBackend::transmit`].
    pub tx_frames: usize,
    /// Host → peer frames placed on the peer's receive ring.
    pub rx_frames: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpBudgets {
    pub max_tx_frames_per_tick: u16,
    pub max_rx_frames_per_tick: u16,
}

impl Default for PumpBudgets {
    fn default() -> Self {
        Self {
            max_tx_frames_per_tick: DEFAULT_MAX_FRAMES_PER_TICK,
            max_rx_frames_per_tick: DEFAULT_MAX_FRAMES_PER_TICK,
        }
    }
}

/// Pumps one device. Frames waiting for receive descriptors are held here between ticks.
#[derive(Debug, Default)]
pub struct VirtioNetPump {
    budgets: PumpBudgets,
    tx: Vec<PktBuf>,
    backlog: Vec<PktBuf>,
}

impl VirtioNetPump {
    pub fn new(budgets: PumpBudgets) -> Self {
        Self {
            budgets,
            tx: Vec::new(),
            backlog: Vec::new(),
        }
    }

    pub fn budgets(&self) -> PumpBudgets {
        self.budgets
    }

    /// Host frames still waiting for the peer to post receive buffers.
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    pub fn tick<B: PacketBackend + ?Sized>(
        &mut self,
        dev: &mut NetDev,
        chans: &mut DmaChannels,
        backend: &mut B,
    ) -> Result<PumpCounts> {
        let mut counts = PumpCounts::default();

        dev.desc_manage(chans)?;

        let mut tx_left = self.budgets.max_tx_frames_per_tick;
        for qid in (1..dev.queue_count()).step_by(2) {
            if tx_left == 0 {
                break;
            }
            let n = dev.dequeue(qid, chans, &mut self.tx, tx_left);
            tx_left -= n;
            for pkt in self.tx.drain(..) {
                backend.transmit(pkt.to_vec());
                dev.release(pkt);
                counts.tx_frames += 1;
            }
        }

        let rx_budget = usize::from(self.budgets.max_rx_frames_per_tick);
        while self.backlog.len() < rx_budget {
            let Some(frame) = backend.poll_receive() else {
                break;
            };
            match dev.packet_from_bytes(&frame) {
                Some(pkt) => self.backlog.push(pkt),
                None => {
                    debug!(dev = dev.dev_id(), len = frame.len(), "no buffers for host frame");
                    break;
                }
            }
        }
        if dev.queue_count() > 0 && !self.backlog.is_empty() {
            counts.rx_frames = usize::from(dev.enqueue(0, chans, &mut self.backlog));
        }

        chans.flush_submit();
        Ok(counts)
    }

    /// Gives every held frame back to `dev`'s buffer source, e.g. before a reset.
    pub fn release_backlog(&mut self, dev: &mut NetDev) {
        for pkt in self.backlog.drain(..) {
            dev.release(pkt);
        }
    }
}
