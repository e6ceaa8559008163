//! The virtio-net header that prefixes every packet on both directions of the ring.

use crate::features::{self, VIRTIO_NET_F_HASH_REPORT};

pub const VIRTIO_NET_HDR_F_NEEDS_CSUM: u8 = 1;
pub const VIRTIO_NET_HDR_F_DATA_VALID: u8 = 2;

pub const VIRTIO_NET_HDR_GSO_NONE: u8 = 0;
pub const VIRTIO_NET_HDR_GSO_TCPV4: u8 = 1;
pub const VIRTIO_NET_HDR_GSO_UDP: u8 = 3;
pub const VIRTIO_NET_HDR_GSO_TCPV6: u8 = 4;
pub const VIRTIO_NET_HDR_GSO_ECN: u8 = 0x80;

/// Checksum offset (from `csum_start`) of the UDP checksum field.
pub const CSUM_OFFSET_UDP: u16 = 6;
/// Checksum offset (from `csum_start`) of the TCP checksum field.
pub const CSUM_OFFSET_TCP: u16 = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtioNetHdr {
    pub flags: u8,
    pub gso_type: u8,
    pub hdr_len: u16,
    pub gso_size: u16,
    pub csum_start: u16,
    pub csum_offset: u16,
    pub num_buffers: u16,
    pub hash_value: u32,
    pub hash_report: u16,
}

impl VirtioNetHdr {
    /// Header length up to and including `num_buffers`.
    pub const LEN: usize = 12;

    /// Header length when `VIRTIO_NET_F_HASH_REPORT` is negotiated.
    pub const HASH_LEN: usize = 20;

    /// Header length the driver and device agreed on for `features`.
    pub fn len_for(features: u64) -> usize {
        if features::has(features, VIRTIO_NET_F_HASH_REPORT) {
            Self::HASH_LEN
        } else {
            Self::LEN
        }
    }

    /// Parses the leading header bytes of a packet. Hash fields are read only when `bytes` is at
    /// least [`Self::HASH_LEN`] long.
    pub fn from_slice_le(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN {
            return None;
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let mut hdr = Self {
            flags: bytes[0],
            gso_type: bytes[1],
            hdr_len: u16_at(2),
            gso_size: u16_at(4),
            csum_start: u16_at(6),
            csum_offset: u16_at(8),
            num_buffers: u16_at(10),
            ..Self::default()
        };
        if bytes.len() >= Self::HASH_LEN {
            hdr.hash_value = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
            hdr.hash_report = u16_at(16);
        }
        Some(hdr)
    }

    /// Serializes the header into the first `out.len()` bytes, which must be [`Self::LEN`] or
    /// [`Self::HASH_LEN`].
    pub fn write_le(&self, out: &mut [u8]) {
        debug_assert!(out.len() == Self::LEN || out.len() == Self::HASH_LEN);
        out[0] = self.flags;
        out[1] = self.gso_type;
        out[2..4].copy_from_slice(&self.hdr_len.to_le_bytes());
        out[4..6].copy_from_slice(&self.gso_size.to_le_bytes());
        out[6..8].copy_from_slice(&self.csum_start.to_le_bytes());
        out[8..10].copy_from_slice(&self.csum_offset.to_le_bytes());
        out[10..12].copy_from_slice(&self.num_buffers.to_le_bytes());
        if out.len() >= Self::HASH_LEN {
            out[12..16].copy_from_slice(&self.hash_value.to_le_bytes());
            out[16..18].copy_from_slice(&self.hash_report.to_le_bytes());
            out[18..20].fill(0);
        }
    }

    pub fn needs_csum(&self) -> bool {
        self.flags & VIRTIO_NET_HDR_F_NEEDS_CSUM != 0
    }

    pub fn gso_type_base(&self) -> u8 {
        self.gso_type & !VIRTIO_NET_HDR_GSO_ECN
    }

    /// Whether both checksum fields are populated.
    pub fn has_csum_request(&self) -> bool {
        self.csum_start != 0 && self.csum_offset != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_length_follows_hash_report() {
        assert_eq!(VirtioNetHdr::len_for(0), 12);
        assert_eq!(
            VirtioNetHdr::len_for(features::bit(VIRTIO_NET_F_HASH_REPORT)),
            20
        );
    }

    #[test]
    fn parses_tso_request() {
        let bytes = [
            VIRTIO_NET_HDR_F_NEEDS_CSUM,
            VIRTIO_NET_HDR_GSO_TCPV4 | VIRTIO_NET_HDR_GSO_ECN,
            54,
            0,
            0xb4,
            0x05,
            34,
            0,
            16,
            0,
            1,
            0,
        ];
        let hdr = VirtioNetHdr::from_slice_le(&bytes).unwrap();
        assert!(hdr.needs_csum());
        assert!(hdr.has_csum_request());
        assert_eq!(hdr.gso_type_base(), VIRTIO_NET_HDR_GSO_TCPV4);
        assert_eq!(hdr.hdr_len, 54);
        assert_eq!(hdr.gso_size, 1460);
        assert_eq!(hdr.csum_start, 34);
        assert_eq!(hdr.csum_offset, CSUM_OFFSET_TCP);
        assert_eq!(hdr.num_buffers, 1);
        assert_eq!(hdr.hash_value, 0);
        assert!(VirtioNetHdr::from_slice_le(&bytes[..10]).is_none());
    }

    #[test]
    fn hash_fields_are_written_when_room() {
        let hdr = VirtioNetHdr {
            flags: VIRTIO_NET_HDR_F_DATA_VALID,
            num_buffers: 3,
            hash_value: 0xdead_beef,
            hash_report: 2,
            ..VirtioNetHdr::default()
        };
        let mut out = [0xffu8; VirtioNetHdr::HASH_LEN];
        hdr.write_le(&mut out);
        assert_eq!(out[0], VIRTIO_NET_HDR_F_DATA_VALID);
        assert_eq!(&out[10..12], &[3, 0]);
        assert_eq!(&out[12..16], &0xdead_beefu32.to_le_bytes());
        assert_eq!(&out[16..18], &[2, 0]);
        assert_eq!(&out[18..20], &[0, 0]);
        assert_eq!(VirtioNetHdr::from_slice_le(&out), Some(hdr));

        let mut short = [0u8; VirtioNetHdr::LEN];
        hdr.write_le(&mut short);
        let parsed = VirtioNetHdr::from_slice_le(&short).unwrap();
        assert_eq!(parsed.num_buffers, 3);
        assert_eq!(parsed.hash_value, 0);
    }
}
