//! Packed-ring event suppression record (driver and device areas).

use bytemuck::{Pod, Zeroable};

/// Size in bytes of the event suppression record.
pub const EVENT_SIZE: usize = 4;

/// Value of the `flags` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RingEventFlags {
    Enable = 0,
    Disable = 1,
    Desc = 2,
}

impl RingEventFlags {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw & 0x3 {
            0 => Some(Self::Enable),
            1 => Some(Self::Disable),
            2 => Some(Self::Desc),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PackedDescEvent {
    off_wrap: u16,
    flags: u16,
}

const _: () = assert!(core::mem::size_of::<PackedDescEvent>() == EVENT_SIZE);

impl PackedDescEvent {
    pub fn new(off_wrap: u16, flags: RingEventFlags) -> Self {
        Self {
            off_wrap: off_wrap.to_le(),
            flags: (flags as u16).to_le(),
        }
    }

    pub fn off_wrap(&self) -> u16 {
        u16::from_le(self.off_wrap)
    }

    pub fn raw_flags(&self) -> u16 {
        u16::from_le(self.flags)
    }

    pub fn flags(&self) -> Option<RingEventFlags> {
        RingEventFlags::from_raw(self.raw_flags())
    }

    /// Whether the peer asked to be signalled at all.
    pub fn wants_events(&self) -> bool {
        self.flags() != Some(RingEventFlags::Disable)
    }
}
