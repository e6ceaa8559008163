//! Wire-level definitions for a virtio-net device that speaks the packed virtqueue layout.
//!
//! Everything here is plain data: offset arithmetic for the 15-bit index + wrap bit counters,
//! the 16-byte packed descriptor and its flag transitions, the driver event-suppression record,
//! the virtio-net header, and the feature/hash-report constants. Nothing in this crate touches
//! remote memory; the device crate moves these bytes through a copy engine.

#![forbid(unsafe_code)]

pub mod desc;
pub mod event;
pub mod features;
pub mod hash;
pub mod hdr;
pub mod offset;

pub use desc::{DescFlags, PackedDesc, ProtocolViolation, DESC_SIZE};
pub use event::{PackedDescEvent, RingEventFlags};
pub use hdr::VirtioNetHdr;
