//! Packet buffers and the pools they come from.
//!
//! A [`PktBuf`] is a fixed-size data room with headroom in front of it, plus the metadata the
//! device fills in (lengths, segment count, offload flags). Large packets are chains of buffers.

#![forbid(unsafe_code)]

mod pkt;
mod pool;

pub use pkt::{OlFlags, PktBuf, TxLengths, DEFAULT_HEADROOM};
pub use pool::{BufferPool, BufferSource, ExtBufCallbacks, PktPool, PoolError};
