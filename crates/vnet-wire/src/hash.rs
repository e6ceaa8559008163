//! Hash types a driver can request through RSS configuration and the report codes the device
//! writes back in the receive header.

pub const VIRTIO_NET_HASH_TYPE_IPV4: u32 = 1 << 0;
pub const VIRTIO_NET_HASH_TYPE_TCPV4: u32 = 1 << 1;
pub const VIRTIO_NET_HASH_TYPE_UDPV4: u32 = 1 << 2;
pub const VIRTIO_NET_HASH_TYPE_IPV6: u32 = 1 << 3;
pub const VIRTIO_NET_HASH_TYPE_TCPV6: u32 = 1 << 4;
pub const VIRTIO_NET_HASH_TYPE_UDPV6: u32 = 1 << 5;
pub const VIRTIO_NET_HASH_TYPE_IP_EX: u32 = 1 << 6;
pub const VIRTIO_NET_HASH_TYPE_TCP_EX: u32 = 1 << 7;
pub const VIRTIO_NET_HASH_TYPE_UDP_EX: u32 = 1 << 8;

/// Value of the `hash_report` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum HashReport {
    #[default]
    None = 0,
    Ipv4 = 1,
    Tcpv4 = 2,
    Udpv4 = 3,
    Ipv6 = 4,
    Tcpv6 = 5,
    Udpv6 = 6,
    Ipv6Ex = 7,
    Tcpv6Ex = 8,
    Udpv6Ex = 9,
}

impl HashReport {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Ipv4,
            2 => Self::Tcpv4,
            3 => Self::Udpv4,
            4 => Self::Ipv6,
            5 => Self::Tcpv6,
            6 => Self::Udpv6,
            7 => Self::Ipv6Ex,
            8 => Self::Tcpv6Ex,
            9 => Self::Udpv6Ex,
            _ => Self::None,
        }
    }
}
