//! Packed virtqueue descriptors.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use core::mem::{offset_of, size_of};

use crate::offset;

/// Size in bytes of one packed descriptor on the wire.
pub const DESC_SIZE: usize = 16;

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DescFlags: u16 {
        const NEXT = 1 << 0;
        const WRITE = 1 << 1;
        const INDIRECT = 1 << 2;
        const AVAIL = 1 << 7;
        const USED = 1 << 15;
    }
}

/// One packed-ring descriptor, stored exactly as it sits in ring memory (little-endian).
///
/// The shadow ring is a slice of these, so descriptor bytes can be copied in and out without any
/// conversion. Flags only change through the named transitions below.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PackedDesc {
    addr: u64,
    len: u32,
    id: u16,
    flags: u16,
}

const _: () = assert!(size_of::<PackedDesc>() == DESC_SIZE);
const _: () = assert!(offset_of!(PackedDesc, addr) == 0);
const _: () = assert!(offset_of!(PackedDesc, len) == 8);
const _: () = assert!(offset_of!(PackedDesc, id) == 12);
const _: () = assert!(offset_of!(PackedDesc, flags) == 14);

/// Byte offset of the `len`/`id`/`flags` word inside a descriptor.
pub const DESC_META_OFFSET: usize = 8;

impl PackedDesc {
    pub fn new(addr: u64, len: u32, id: u16, flags: DescFlags) -> Self {
        Self {
            addr: addr.to_le(),
            len: len.to_le(),
            id: id.to_le(),
            flags: flags.bits().to_le(),
        }
    }

    /// A descriptor the driver made available while its wrap counter was `wrap`.
    pub fn available(addr: u64, len: u32, id: u16, extra: DescFlags, wrap: bool) -> Self {
        let mut desc = Self::new(addr, len, id, extra);
        desc.mark_available(wrap);
        desc
    }

    #[inline]
    pub fn addr(&self) -> u64 {
        u64::from_le(self.addr)
    }

    #[inline]
    pub fn len(&self) -> u32 {
        u32::from_le(self.len)
    }

    #[inline]
    pub fn id(&self) -> u16 {
        u16::from_le(self.id)
    }

    #[inline]
    pub fn flags(&self) -> DescFlags {
        DescFlags::from_bits_retain(u16::from_le(self.flags))
    }

    #[inline]
    pub fn raw_flags(&self) -> u16 {
        u16::from_le(self.flags)
    }

    #[inline]
    pub fn has_next(&self) -> bool {
        self.flags().contains(DescFlags::NEXT)
    }

    #[inline]
    pub fn is_avail(&self) -> bool {
        self.flags().contains(DescFlags::AVAIL)
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.flags().contains(DescFlags::USED)
    }

    #[inline]
    pub fn set_len(&mut self, len: u32) {
        self.len = len.to_le();
    }

    #[inline]
    pub fn set_id(&mut self, id: u16) {
        self.id = id.to_le();
    }

    #[inline]
    fn store_flags(&mut self, flags: DescFlags) {
        self.flags = flags.bits().to_le();
    }

    /// Driver side: publish the descriptor for wrap counter `wrap`.
    ///
    /// AVAIL follows the wrap counter and USED is its inverse.
    pub fn mark_available(&mut self, wrap: bool) {
        let mut flags = self.flags() - (DescFlags::AVAIL | DescFlags::USED);
        if wrap {
            flags |= DescFlags::AVAIL;
        } else {
            flags |= DescFlags::USED;
        }
        self.store_flags(flags);
    }

    /// Device side: mark the descriptor consumed by copying AVAIL into USED.
    #[inline]
    pub fn set_used_from_avail(&mut self) {
        let mut flags = self.flags();
        flags.set(DescFlags::USED, flags.contains(DescFlags::AVAIL));
        self.store_flags(flags);
    }

    /// Clears the `len`/`id`/`flags` word so a slot awaiting a copy cannot pass validation.
    #[inline]
    pub fn invalidate(&mut self) {
        self.len = 0;
        self.id = 0;
        self.flags = 0;
    }

    #[inline]
    fn is_unpopulated(&self) -> bool {
        self.len == 0 && self.id == 0 && self.flags == 0
    }

    /// Returns the `len`/`id`/`flags` word exactly as it is laid out in ring memory.
    pub fn meta_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(&bytemuck::bytes_of(self)[DESC_META_OFFSET..]);
        out
    }

    /// Checks that a descriptor fetched at ring offset `off` was published for that lap.
    pub fn validate_avail(&self, off: u16) -> Result<(), ProtocolViolation> {
        let flags = self.raw_flags();
        if self.is_unpopulated() {
            return Err(ProtocolViolation::Unpopulated { off });
        }
        if self.is_avail() != offset::wrap(off) {
            return Err(ProtocolViolation::WrapMismatch {
                off,
                flags,
                wrap: offset::wrap(off),
            });
        }
        if self.is_used() == self.is_avail() {
            return Err(ProtocolViolation::AlreadyUsed { off, flags });
        }
        Ok(())
    }

    /// Checks that a descriptor at ring offset `off` is marked consumed and ready for write-back.
    pub fn validate_consumed(&self, off: u16) -> Result<(), ProtocolViolation> {
        let flags = self.raw_flags();
        if self.is_unpopulated() {
            return Err(ProtocolViolation::Unpopulated { off });
        }
        if self.is_avail() != offset::wrap(off) {
            return Err(ProtocolViolation::WrapMismatch {
                off,
                flags,
                wrap: offset::wrap(off),
            });
        }
        if self.is_used() != self.is_avail() {
            return Err(ProtocolViolation::NotConsumed { off, flags });
        }
        Ok(())
    }
}

/// Sets USED from AVAIL on four consecutive descriptors.
#[inline]
pub fn set_used_from_avail_x4(descs: &mut [PackedDesc; 4]) {
    for desc in descs {
        desc.set_used_from_avail();
    }
}

impl core::fmt::Debug for PackedDesc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PackedDesc")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .field("id", &self.id())
            .field("flags", &self.flags())
            .finish()
    }
}

/// The ring no longer satisfies the packed-queue ownership rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("descriptor at offset {off:#06x} was never populated")]
    Unpopulated { off: u16 },
    #[error("descriptor at offset {off:#06x} has flags {flags:#06x}, expected AVAIL={wrap}")]
    WrapMismatch { off: u16, flags: u16, wrap: bool },
    #[error("descriptor at offset {off:#06x} has flags {flags:#06x}, already marked used")]
    AlreadyUsed { off: u16, flags: u16 },
    #[error("descriptor at offset {off:#06x} has flags {flags:#06x}, not marked used")]
    NotConsumed { off: u16, flags: u16 },
}
