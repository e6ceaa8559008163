//! Packet class → reported hash type lookup used when filling receive headers.

use core::sync::atomic::{AtomicU8, Ordering};

use vnet_wire::hash::*;

/// Packet type classification carried in [`vnet_buf::PktBuf::packet_type`].
pub mod ptype {
    pub const L3_IPV4: u32 = 0x0000_0010;
    pub const L3_IPV4_EXT: u32 = 0x0000_0030;
    pub const L3_IPV6: u32 = 0x0000_0040;
    pub const L3_IPV4_EXT_UNKNOWN: u32 = 0x0000_0090;
    pub const L3_IPV6_EXT: u32 = 0x0000_00c0;
    pub const L3_IPV6_EXT_UNKNOWN: u32 = 0x0000_00e0;
    pub const L4_TCP: u32 = 0x0000_0100;
    pub const L4_UDP: u32 = 0x0000_0200;
}

use ptype::*;

const ENTRIES: usize = 256;

const IPV4_ALL: &[u32] = &[
    L3_IPV4,
    L3_IPV4_EXT,
    L3_IPV4_EXT_UNKNOWN,
    L3_IPV4 | L4_TCP,
    L3_IPV4 | L4_UDP,
];
const IPV6_L3: [u32; 3] = [L3_IPV6, L3_IPV6_EXT, L3_IPV6_EXT_UNKNOWN];
const IPV6_ALL: &[u32] = &[
    L3_IPV6,
    L3_IPV6_EXT,
    L3_IPV6_EXT_UNKNOWN,
    L3_IPV6 | L4_TCP,
    L3_IPV6_EXT | L4_TCP,
    L3_IPV6_EXT_UNKNOWN | L4_TCP,
    L3_IPV6 | L4_UDP,
    L3_IPV6_EXT | L4_UDP,
    L3_IPV6_EXT_UNKNOWN | L4_UDP,
];
const IPV6_TCP: &[u32] = &[
    IPV6_L3[0] | L4_TCP,
    IPV6_L3[1] | L4_TCP,
    IPV6_L3[2] | L4_TCP,
];
const IPV6_UDP: &[u32] = &[
    IPV6_L3[0] | L4_UDP,
    IPV6_L3[1] | L4_UDP,
    IPV6_L3[2] | L4_UDP,
];
const IPV6_EX_ALL: &[u32] = &[
    L3_IPV6_EXT,
    L3_IPV6_EXT_UNKNOWN,
    L3_IPV6_EXT | L4_TCP,
    L3_IPV6_EXT_UNKNOWN | L4_TCP,
    L3_IPV6_EXT | L4_UDP,
    L3_IPV6_EXT_UNKNOWN | L4_UDP,
];
const IPV6_EX_TCP: &[u32] = &[L3_IPV6_EXT | L4_TCP, L3_IPV6_EXT_UNKNOWN | L4_TCP];
const IPV6_EX_UDP: &[u32] = &[L3_IPV6_EXT | L4_UDP, L3_IPV6_EXT_UNKNOWN | L4_UDP];

/// Applied in order, so a more specific hash type overrides a broader one for the same class.
const RULES: &[(u32, &[u32], HashReport)] = &[
    (VIRTIO_NET_HASH_TYPE_IPV4, IPV4_ALL, HashReport::Ipv4),
    (VIRTIO_NET_HASH_TYPE_TCPV4, &[L3_IPV4 | L4_TCP], HashReport::Tcpv4),
    (VIRTIO_NET_HASH_TYPE_UDPV4, &[L3_IPV4 | L4_UDP], HashReport::Udpv4),
    (VIRTIO_NET_HASH_TYPE_IPV6, IPV6_ALL, HashReport::Ipv6),
    (VIRTIO_NET_HASH_TYPE_TCPV6, IPV6_TCP, HashReport::Tcpv6),
    (VIRTIO_NET_HASH_TYPE_UDPV6, IPV6_UDP, HashReport::Udpv6),
    (VIRTIO_NET_HASH_TYPE_IP_EX, IPV6_EX_ALL, HashReport::Ipv6Ex),
    (VIRTIO_NET_HASH_TYPE_TCP_EX, IPV6_EX_TCP, HashReport::Tcpv6Ex),
    (VIRTIO_NET_HASH_TYPE_UDP_EX, IPV6_EX_UDP, HashReport::Udpv6Ex),
];

#[inline]
fn class(packet_type: u32) -> usize {
    ((packet_type >> 4) & 0xff) as usize
}

/// Table from packet class to the hash type reported for it.
///
/// Owned by the device and shared with its receive queues. Entries are rewritten when the peer
/// reconfigures RSS while queues keep reading, hence atomics.
#[derive(Debug)]
pub struct HashReportTable {
    entries: [AtomicU8; ENTRIES],
}

impl Default for HashReportTable {
    fn default() -> Self {
        Self {
            entries: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }
}

impl HashReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the table for the `VIRTIO_NET_HASH_TYPE_*` mask the peer requested.
    pub fn configure(&self, hash_types: u32) {
        self.clear();
        for &(bit, classes, report) in RULES {
            if hash_types & bit == 0 {
                continue;
            }
            for &ptype in classes {
                self.entries[class(ptype)].store(report as u8, Ordering::Relaxed);
            }
        }
    }

    pub fn clear(&self) {
        for entry in &self.entries {
            entry.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn get(&self, packet_type: u32) -> HashReport {
        HashReport::from_raw(self.entries[class(packet_type)].load(Ordering::Relaxed))
    }
}
