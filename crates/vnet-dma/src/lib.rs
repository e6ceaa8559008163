//! Asynchronous copy-engine plumbing.
//!
//! The device never dereferences remote memory. Instead it stages block copies on a
//! [`VirtualChannel`], which batches them into engine operations and, when an operation finishes,
//! applies the [`OffsetCursor`] updates that were recorded against it. A cursor therefore only
//! moves once the bytes it describes are actually in place.

#![forbid(unsafe_code)]

mod cursor;
pub mod remote;
mod soft;
mod vchan;

pub use cursor::OffsetCursor;
pub use remote::{DenseMemory, RemoteMemory, RemoteMemoryError};
pub use soft::{SoftCopyEngine, SoftEngineControl};
pub use vchan::{VchanStats, VirtualChannel, MAX_POINTERS};

/// Errors reported by a [`CopyEngine`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CopyError {
    /// The engine cannot accept another operation right now. Staged copies are kept.
    #[error("copy engine queue is full")]
    Busy,
    #[error(transparent)]
    Remote(#[from] RemoteMemoryError),
    #[error("copy engine transfer failed")]
    Transfer,
}

/// A block-copy engine between local memory and a remote address space.
///
/// `read`/`write` stage one scatter-gather element of the operation currently being built;
/// `submit` closes that operation. Operations complete strictly in submission order. An engine
/// may move bytes at staging time, but callers must not rely on a destination until the owning
/// operation is reported by `completed`.
pub trait CopyEngine {
    /// Stages a remote → local copy.
    fn read(&mut self, src: u64, dst: &mut [u8]) -> Result<(), CopyError>;

    /// Stages a local → remote copy.
    fn write(&mut self, src: &[u8], dst: u64) -> Result<(), CopyError>;

    /// Hands the staged elements to the engine as one operation.
    fn submit(&mut self) -> Result<(), CopyError>;

    /// Number of operations that finished since the previous call.
    fn completed(&mut self) -> Result<u16, CopyError>;
}

impl<T: CopyEngine + ?Sized> CopyEngine for Box<T> {
    fn read(&mut self, src: u64, dst: &mut [u8]) -> Result<(), CopyError> {
        <T as CopyEngine>::read(&mut **self, src, dst)
    }

    fn write(&mut self, src: &[u8], dst: u64) -> Result<(), CopyError> {
        <T as CopyEngine>::write(&mut **self, src, dst)
    }

    fn submit(&mut self) -> Result<(), CopyError> {
        <T as CopyEngine>::submit(&mut **self)
    }

    fn completed(&mut self) -> Result<u16, CopyError> {
        <T as CopyEngine>::completed(&mut **self)
    }
}
