//! Memory on the far side of the copy engine.

/// Errors returned by [`RemoteMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteMemoryError {
    #[error("remote access out of range: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfRange { addr: u64, len: usize, size: u64 },
    #[error("remote memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
}

pub type RemoteMemoryResult<T> = Result<T, RemoteMemoryError>;

/// Byte-addressable memory owned by the peer (ring descriptors, packet buffers).
///
/// The device never touches it directly; only a copy engine does.
pub trait RemoteMemory {
    fn size(&self) -> u64;

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> RemoteMemoryResult<()>;

    fn write_from(&mut self, addr: u64, src: &[u8]) -> RemoteMemoryResult<()>;

    fn read_u16_le(&self, addr: u64) -> RemoteMemoryResult<u16> {
        let mut buf = [0u8; 2];
        self.read_into(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&self, addr: u64) -> RemoteMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&self, addr: u64) -> RemoteMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u16_le(&mut self, addr: u64, value: u16) -> RemoteMemoryResult<()> {
        self.write_from(addr, &value.to_le_bytes())
    }

    fn write_u32_le(&mut self, addr: u64, value: u32) -> RemoteMemoryResult<()> {
        self.write_from(addr, &value.to_le_bytes())
    }

    fn write_u64_le(&mut self, addr: u64, value: u64) -> RemoteMemoryResult<()> {
        self.write_from(addr, &value.to_le_bytes())
    }
}

fn check_range(size: u64, addr: u64, len: usize) -> RemoteMemoryResult<(usize, usize)> {
    let oob = RemoteMemoryError::OutOfRange { addr, len, size };
    let end = addr.checked_add(len as u64).ok_or(oob.clone())?;
    if end > size {
        return Err(oob);
    }
    let start = usize::try_from(addr).map_err(|_| oob.clone())?;
    Ok((start, start + len))
}

/// Flat, fully-allocated remote memory.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> RemoteMemoryResult<Self> {
        let size_usize =
            usize::try_from(size).map_err(|_| RemoteMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; size_usize].into_boxed_slice(),
        })
    }
}

impl RemoteMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> RemoteMemoryResult<()> {
        let (start, end) = check_range(self.size(), addr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, addr: u64, src: &[u8]) -> RemoteMemoryResult<()> {
        let (start, end) = check_range(self.size(), addr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_helpers() {
        let mut mem = DenseMemory::new(64).unwrap();
        mem.write_u16_le(2, 0x1122).unwrap();
        mem.write_u32_le(4, 0x3344_5566).unwrap();
        mem.write_u64_le(8, 0x7788_99aa_bbcc_ddee).unwrap();
        assert_eq!(mem.read_u16_le(2).unwrap(), 0x1122);
        assert_eq!(mem.read_u32_le(4).unwrap(), 0x3344_5566);
        assert_eq!(mem.read_u64_le(8).unwrap(), 0x7788_99aa_bbcc_ddee);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let mut mem = DenseMemory::new(16).unwrap();
        assert_eq!(
            mem.write_from(12, &[0u8; 8]),
            Err(RemoteMemoryError::OutOfRange {
                addr: 12,
                len: 8,
                size: 16
            })
        );
        let mut buf = [0u8; 2];
        assert!(mem.read_into(u64::MAX, &mut buf).is_err());
        assert!(mem.read_into(14, &mut buf).is_ok());
    }
}
