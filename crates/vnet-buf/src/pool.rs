use std::sync::{Arc, Mutex};

use crate::PktBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("buffer pool exhausted: requested {requested}, available {available}")]
    Exhausted { requested: usize, available: usize },
}

/// A source of fixed-size packet buffers.
pub trait BufferPool {
    fn headroom(&self) -> u16;

    fn dataroom(&self) -> u16;

    fn available(&self) -> usize;

    /// Fills every slot of `out` or none of them.
    fn get_bulk(&mut self, out: &mut [Option<PktBuf>]) -> Result<(), PoolError>;

    /// Returns a buffer (and every segment chained to it) to the pool.
    fn put(&mut self, buf: PktBuf);

    fn get(&mut self) -> Option<PktBuf> {
        let mut slot = [None];
        self.get_bulk(&mut slot).ok()?;
        let [buf] = slot;
        buf
    }
}

impl<P: BufferPool + ?Sized> BufferPool for Box<P> {
    fn headroom(&self) -> u16 {
        <P as BufferPool>::headroom(&**self)
    }

    fn dataroom(&self) -> u16 {
        <P as BufferPool>::dataroom(&**self)
    }

    fn available(&self) -> usize {
        <P as BufferPool>::available(&**self)
    }

    fn get_bulk(&mut self, out: &mut [Option<PktBuf>]) -> Result<(), PoolError> {
        <P as BufferPool>::get_bulk(&mut **self, out)
    }

    fn put(&mut self, buf: PktBuf) {
        <P as BufferPool>::put(&mut **self, buf)
    }
}

/// Shared pools are what a device and its application normally hold: the device allocates
/// receive-side buffers and frees transmitted ones while the application does the opposite.
impl<P: BufferPool> BufferPool for Arc<Mutex<P>> {
    fn headroom(&self) -> u16 {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .headroom()
    }

    fn dataroom(&self) -> u16 {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .dataroom()
    }

    fn available(&self) -> usize {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .available()
    }

    fn get_bulk(&mut self, out: &mut [Option<PktBuf>]) -> Result<(), PoolError> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_bulk(out)
    }

    fn put(&mut self, buf: PktBuf) {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .put(buf)
    }
}

/// A fixed-population pool. All buffers are allocated up front.
#[derive(Debug)]
pub struct PktPool {
    free: Vec<PktBuf>,
    capacity: usize,
    headroom: u16,
    dataroom: u16,
}

impl PktPool {
    pub fn new(capacity: usize, headroom: u16, dataroom: u16) -> Self {
        Self {
            free: (0..capacity)
                .map(|_| PktBuf::new(headroom, dataroom))
                .collect(),
            capacity,
            headroom,
            dataroom,
        }
    }

    pub fn shared(capacity: usize, headroom: u16, dataroom: u16) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(capacity, headroom, dataroom)))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently handed out.
    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }
}

impl BufferPool for PktPool {
    fn headroom(&self) -> u16 {
        self.headroom
    }

    fn dataroom(&self) -> u16 {
        self.dataroom
    }

    fn available(&self) -> usize {
        self.free.len()
    }

    fn get_bulk(&mut self, out: &mut [Option<PktBuf>]) -> Result<(), PoolError> {
        if out.len() > self.free.len() {
            return Err(PoolError::Exhausted {
                requested: out.len(),
                available: self.free.len(),
            });
        }
        let start = self.free.len() - out.len();
        for (slot, buf) in out.iter_mut().zip(self.free.drain(start..)) {
            *slot = Some(buf);
        }
        Ok(())
    }

    fn put(&mut self, buf: PktBuf) {
        for mut seg in buf.into_segments() {
            seg.reset();
            debug_assert!(self.free.len() < self.capacity);
            self.free.push(seg);
        }
    }
}

/// Buffers owned by the application rather than by a pool the device can draw from directly.
pub trait ExtBufCallbacks {
    fn headroom(&self) -> u16;

    fn dataroom(&self) -> u16;

    /// Fills every slot of `out` or none of them.
    fn get(&mut self, dev_id: u16, out: &mut [Option<PktBuf>]) -> Result<(), PoolError>;

    fn put(&mut self, dev_id: u16, buf: PktBuf);
}

/// Where a device gets packet buffers from and returns them to.
pub enum BufferSource {
    Pool(Box<dyn BufferPool + Send>),
    External {
        dev_id: u16,
        callbacks: Box<dyn ExtBufCallbacks + Send>,
    },
}

impl BufferSource {
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }

    pub fn headroom(&self) -> u16 {
        match self {
            Self::Pool(pool) => pool.headroom(),
            Self::External { callbacks, .. } => callbacks.headroom(),
        }
    }

    pub fn dataroom(&self) -> u16 {
        match self {
            Self::Pool(pool) => pool.dataroom(),
            Self::External { callbacks, .. } => callbacks.dataroom(),
        }
    }

    /// Allocates into every slot of `out` or none of them.
    #[inline]
    pub fn get_bulk(&mut self, out: &mut [Option<PktBuf>]) -> Result<(), PoolError> {
        match self {
            Self::Pool(pool) => pool.get_bulk(out),
            Self::External { dev_id, callbacks } => callbacks.get(*dev_id, out),
        }
    }

    #[inline]
    pub fn get(&mut self) -> Option<PktBuf> {
        let mut slot = [None];
        self.get_bulk(&mut slot).ok()?;
        let [buf] = slot;
        buf
    }

    #[inline]
    pub fn put(&mut self, buf: PktBuf) {
        match self {
            Self::Pool(pool) => pool.put(buf),
            Self::External { dev_id, callbacks } => callbacks.put(*dev_id, buf),
        }
    }
}

impl core::fmt::Debug for BufferSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Pool(pool) => f
                .debug_struct("Pool")
                .field("available", &pool.available())
                .finish(),
            Self::External { dev_id, .. } => {
                f.debug_struct("External").field("dev_id", dev_id).finish()
            }
        }
    }
}
