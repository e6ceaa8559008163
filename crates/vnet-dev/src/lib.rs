//! A virtio-net device backend for packed virtqueues whose rings and payloads live in memory the
//! worker can only reach through an asynchronous copy engine.
//!
//! The worker keeps a local mirror of every ring (the shadow ring) and moves descriptors and data
//! in batched copies:
//!
//! * descriptor management ([`NetDev::desc_manage`]) mirrors newly published descriptors and
//!   writes completions back;
//! * [`NetDev::dequeue`] stages payload copies for mirrored descriptors and turns finished ones
//!   into [`PktBuf`] chains with their offload metadata decoded;
//! * [`NetDev::enqueue`] copies packets into receive buffers the peer posted.
//!
//! Which monomorphized copy of each path runs is decided once per DRIVER_OK from the negotiated
//! features (see [`mode`]). [`VirtioNetPump`] ties a device to a host [`PacketBackend`].

mod backend;
mod complete;
mod config;
pub mod ctrl;
mod deq;
mod dma;
mod enq;
mod error;
mod fetch;
pub mod hash;
mod manage;
pub mod mode;
mod netdev;
mod pump;
mod queue;
mod registry;
pub mod signal;
pub mod transform;

pub use backend::{LoopbackBackend, PacketBackend};
pub use config::{CtrlPollBudget, LinkInfo, NetDevConfig, QueueConf};
pub use ctrl::{CtrlAck, CtrlCommand, MacAddr, MacFilterKind, NetDevCallbacks, NoCallbacks, RssConfig};
pub use deq::HOST_DATA_HINT;
pub use dma::{DmaChannels, VchanPair};
pub use error::{NetDevError, Result};
pub use hash::HashReportTable;
pub use mode::{DeqMode, EnqMode, MgmtMode, ModeSelection};
pub use netdev::{
    DeviceStatus, NetConfigSpace, NetDev, SUPPORTED_HASH_TYPES, VIRTIO_NET_S_LINK_UP,
};
pub use pump::{PumpBudgets, PumpCounts, VirtioNetPump, DEFAULT_MAX_FRAMES_PER_TICK};
pub use queue::{Direction, Queue, QueueOffsets, QueueState, QueueStats};
pub use registry::{DevHandle, NetDevRegistry};
pub use signal::{InterruptLine, PeerSignals, QueueDoorbell, INTR_RAISE, ISR_CONFIG_CHANGE};
pub use transform::{Batch4Decoder, HdrLanes, TxOffload};

pub use vnet_buf::{BufferSource, PktBuf};
