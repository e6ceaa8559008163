use thiserror::Error;
use vnet_buf::PoolError;
use vnet_dma::CopyError;

pub type Result<T> = std::result::Result<T, NetDevError>;

/// Errors surfaced by the slow-path device API (configuration, status changes, control commands).
///
/// The per-packet paths never return these: they report how much work they did and leave the rest
/// for a later poll.
#[derive(Debug, Error)]
pub enum NetDevError {
    #[error("queue {qid} out of range (device has {max} data queues)")]
    InvalidQueue { qid: u16, max: u16 },

    #[error("queue {qid}: ring size {size} is not a power of two in 1..=32768")]
    InvalidQueueSize { qid: u16, size: u16 },

    #[error("negotiated features {negotiated:#018x} are not a subset of offered {offered:#018x}")]
    InvalidFeatures { negotiated: u64, offered: u64 },

    #[error("no copy channel pair registered for vchan {0}")]
    UnknownChannel(u16),

    #[error("operation not supported by the device or its callbacks")]
    NotSupported,

    #[error("copy engine produced no completion within {polls} polls")]
    DmaTimeout { polls: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("malformed control command: {0}")]
    MalformedCommand(&'static str),

    #[error("device handle {0} already registered")]
    DuplicateDevice(u16),

    #[error("unknown device handle {0}")]
    UnknownDevice(u16),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Copy(#[from] CopyError),
}
