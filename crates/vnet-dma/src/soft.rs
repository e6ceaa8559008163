use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{CopyEngine, CopyError, DenseMemory, RemoteMemory};

/// Knobs for a [`SoftCopyEngine`] that stay reachable after the engine is boxed into a channel.
#[derive(Debug, Default)]
pub struct SoftEngineControl {
    stalled: AtomicBool,
    max_in_flight: AtomicUsize,
    per_poll: AtomicUsize,
}

impl SoftEngineControl {
    /// While stalled, no operation completes.
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Relaxed);
    }

    /// Caps submitted-but-incomplete operations; `submit` reports `Busy` past the cap. 0 = no cap.
    pub fn set_max_in_flight(&self, max: usize) {
        self.max_in_flight.store(max, Ordering::Relaxed);
    }

    /// Caps operations retired per `completed` call. 0 = no cap.
    pub fn set_completions_per_poll(&self, max: usize) {
        self.per_poll.store(max, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct StagedWrite {
    dst: u64,
    data: Vec<u8>,
}

/// A copy engine implemented in software over shared remote memory.
///
/// Reads land in the destination at staging time. Writes are buffered per operation and reach
/// remote memory only when the operation completes, so a peer polling the same memory never sees
/// a write-back before the device has been told about it.
pub struct SoftCopyEngine<M: RemoteMemory = DenseMemory> {
    mem: Arc<Mutex<M>>,
    building: Vec<StagedWrite>,
    in_flight: VecDeque<Vec<StagedWrite>>,
    control: Arc<SoftEngineControl>,
}

impl<M: RemoteMemory> SoftCopyEngine<M> {
    pub fn new(mem: Arc<Mutex<M>>) -> Self {
        Self {
            mem,
            building: Vec::new(),
            in_flight: VecDeque::new(),
            control: Arc::new(SoftEngineControl::default()),
        }
    }

    pub fn control(&self) -> Arc<SoftEngineControl> {
        Arc::clone(&self.control)
    }

    fn mem(&self) -> MutexGuard<'_, M> {
        self.mem.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<M: RemoteMemory> CopyEngine for SoftCopyEngine<M> {
    fn read(&mut self, src: u64, dst: &mut [u8]) -> Result<(), CopyError> {
        self.mem().read_into(src, dst)?;
        Ok(())
    }

    fn write(&mut self, src: &[u8], dst: u64) -> Result<(), CopyError> {
        let size = self.mem().size();
        let end = dst.checked_add(src.len() as u64);
        if end.map_or(true, |end| end > size) {
            return Err(CopyError::Remote(
                crate::RemoteMemoryError::OutOfRange {
                    addr: dst,
                    len: src.len(),
                    size,
                },
            ));
        }
        self.building.push(StagedWrite {
            dst,
            data: src.to_vec(),
        });
        Ok(())
    }

    fn submit(&mut self) -> Result<(), CopyError> {
        let cap = self.control.max_in_flight.load(Ordering::Relaxed);
        if cap != 0 && self.in_flight.len() >= cap {
            return Err(CopyError::Busy);
        }
        self.in_flight.push_back(std::mem::take(&mut self.building));
        Ok(())
    }

    fn completed(&mut self) -> Result<u16, CopyError> {
        if self.control.stalled.load(Ordering::Relaxed) {
            return Ok(0);
        }
        let cap = match self.control.per_poll.load(Ordering::Relaxed) {
            0 => usize::MAX,
            n => n,
        };
        let count = self.in_flight.len().min(cap).min(usize::from(u16::MAX));
        let mut mem = self.mem.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for op in self.in_flight.drain(..count) {
            for write in op {
                mem.write_from(write.dst, &write.data)?;
            }
        }
        Ok(count as u16)
    }
}
