use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use vnet_dma::{RemoteMemory, SoftCopyEngine, VirtualChannel};

use crate::config::CtrlPollBudget;
use crate::{NetDevError, Result};

/// The two copy directions of one channel id.
#[derive(Debug)]
pub struct VchanPair {
    /// Remote → local: descriptor fetches and payload reads.
    pub dev2mem: VirtualChannel,
    /// Local → remote: payload writes, completion write-backs, control acks.
    pub mem2dev: VirtualChannel,
}

impl VchanPair {
    pub fn new(dev2mem: VirtualChannel, mem2dev: VirtualChannel) -> Self {
        Self { dev2mem, mem2dev }
    }

    /// Both directions served by software engines over the same remote memory.
    pub fn soft<M>(mem: &Arc<Mutex<M>>, id: u16) -> Self
    where
        M: RemoteMemory + Send + 'static,
    {
        Self {
            dev2mem: VirtualChannel::new(id, Box::new(SoftCopyEngine::new(Arc::clone(mem)))),
            mem2dev: VirtualChannel::new(id, Box::new(SoftCopyEngine::new(Arc::clone(mem)))),
        }
    }

    /// Submits whatever is staged in either direction.
    pub fn submit_pending(&mut self) -> bool {
        let a = self.dev2mem.submit_pending();
        let b = self.mem2dev.submit_pending();
        a && b
    }

    pub fn poll(&mut self, atomic: bool) {
        self.dev2mem.poll(atomic);
        self.mem2dev.poll(atomic);
    }

    pub fn is_idle(&self) -> bool {
        self.dev2mem.is_idle() && self.mem2dev.is_idle()
    }
}

/// The copy channels one worker drives, keyed by channel id.
#[derive(Debug, Default)]
pub struct DmaChannels {
    pairs: BTreeMap<u16, VchanPair>,
}

impl DmaChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `pair` under `id`, returning any pair it replaces.
    pub fn insert(&mut self, id: u16, pair: VchanPair) -> Option<VchanPair> {
        self.pairs.insert(id, pair)
    }

    pub fn remove(&mut self, id: u16) -> Option<VchanPair> {
        self.pairs.remove(&id)
    }

    pub fn pair_mut(&mut self, id: u16) -> Result<&mut VchanPair> {
        self.pairs.get_mut(&id).ok_or(NetDevError::UnknownChannel(id))
    }

    pub fn pair(&self, id: u16) -> Result<&VchanPair> {
        self.pairs.get(&id).ok_or(NetDevError::UnknownChannel(id))
    }

    /// Submits staged copies on every channel. Returns `false` if any engine refused.
    pub fn flush_submit(&mut self) -> bool {
        let mut all = true;
        for pair in self.pairs.values_mut() {
            all &= pair.submit_pending();
        }
        all
    }

    pub fn poll_all(&mut self, atomic: bool) {
        for pair in self.pairs.values_mut() {
            pair.poll(atomic);
        }
    }
}

fn pause(budget: CtrlPollBudget) {
    if !budget.interval.is_zero() {
        std::thread::sleep(budget.interval);
    }
}

fn submit_within(chan: &mut VirtualChannel, budget: CtrlPollBudget) -> Result<()> {
    for _ in 0..budget.polls {
        if chan.submit_pending() {
            return Ok(());
        }
        chan.poll(true);
        pause(budget);
    }
    Err(NetDevError::DmaTimeout {
        polls: budget.polls,
    })
}

/// Runs one copy to completion on `chan`, outside of any batch.
///
/// Whatever is already staged is submitted first so the copy gets an operation of its own. Only
/// bring-up and control paths use this; the packet paths never wait.
pub(crate) fn copy_sync(
    chan: &mut VirtualChannel,
    budget: CtrlPollBudget,
    stage: impl FnOnce(&mut VirtualChannel),
) -> Result<()> {
    submit_within(chan, budget)?;
    let op = chan.tail();
    stage(chan);
    submit_within(chan, budget)?;
    for _ in 0..budget.polls {
        chan.poll(true);
        if chan.op_status(op) {
            return Ok(());
        }
        pause(budget);
    }
    Err(NetDevError::DmaTimeout {
        polls: budget.polls,
    })
}

/// Submits and polls both directions of `pair` until nothing is staged or in flight.
pub(crate) fn drain(pair: &mut VchanPair, budget: CtrlPollBudget) -> Result<()> {
    for _ in 0..budget.polls {
        pair.submit_pending();
        pair.poll(true);
        if pair.is_idle() {
            return Ok(());
        }
        pause(budget);
    }
    Err(NetDevError::DmaTimeout {
        polls: budget.polls,
    })
}
