use bitflags::bitflags;

/// Headroom reserved in front of the data room of every pool buffer.
pub const DEFAULT_HEADROOM: u16 = 128;

bitflags! {
    /// Offload flags carried with a packet.
    ///
    /// `RX_*` flags describe a packet the device hands to the peer; `TX_*` flags request work
    /// from whoever transmits a packet the peer handed to the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OlFlags: u64 {
        const RX_RSS_HASH = 1 << 1;
        const RX_L4_CKSUM_GOOD = 1 << 8;

        const TX_UDP_SEG = 1 << 42;
        const TX_TCP_SEG = 1 << 50;
        const TX_TCP_CKSUM = 1 << 52;
        const TX_UDP_CKSUM = 1 << 53;
        const TX_IP_CKSUM = 1 << 54;
        const TX_IPV4 = 1 << 55;
        const TX_IPV6 = 1 << 56;

        const TX_IPV4_UDP = Self::TX_IP_CKSUM.bits() | Self::TX_IPV4.bits() | Self::TX_UDP_CKSUM.bits();
        const TX_IPV4_TCP = Self::TX_IP_CKSUM.bits() | Self::TX_IPV4.bits() | Self::TX_TCP_CKSUM.bits();
        const TX_IPV4_TCP_TSO = Self::TX_IPV4_TCP.bits() | Self::TX_TCP_SEG.bits();
        const TX_IPV4_UDP_SEG = Self::TX_IPV4_UDP.bits() | Self::TX_UDP_SEG.bits();
        const TX_IPV6_TCP_TSO = Self::TX_IP_CKSUM.bits()
            | Self::TX_IPV6.bits()
            | Self::TX_TCP_CKSUM.bits()
            | Self::TX_TCP_SEG.bits();
    }
}

/// Header lengths and segment size for transmit offloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxLengths {
    pub l2_len: u16,
    pub l3_len: u16,
    pub l4_len: u16,
    pub tso_segsz: u16,
}

/// A packet buffer, optionally the head of a chain of segments.
///
/// Bytes `[data_off, data_off + data_len)` of the backing storage hold this segment's data.
/// `pkt_len` and `nb_segs` are meaningful on the head and cover the whole chain.
pub struct PktBuf {
    storage: Box<[u8]>,
    headroom: u16,
    pub data_off: u16,
    pub data_len: u16,
    pub pkt_len: u32,
    pub nb_segs: u16,
    pub ol_flags: OlFlags,
    pub tx: TxLengths,
    pub packet_type: u32,
    pub hash: u32,
    next: Option<Box<PktBuf>>,
}

impl PktBuf {
    pub fn new(headroom: u16, dataroom: u16) -> Self {
        Self {
            storage: vec![0u8; usize::from(headroom) + usize::from(dataroom)].into_boxed_slice(),
            headroom,
            data_off: headroom,
            data_len: 0,
            pkt_len: 0,
            nb_segs: 1,
            ol_flags: OlFlags::empty(),
            tx: TxLengths::default(),
            packet_type: 0,
            hash: 0,
            next: None,
        }
    }

    /// A single-segment packet holding `payload`, which must fit the data room.
    pub fn with_payload(headroom: u16, dataroom: u16, payload: &[u8]) -> Option<Self> {
        let len = u16::try_from(payload.len()).ok()?;
        if len > dataroom {
            return None;
        }
        let mut buf = Self::new(headroom, dataroom);
        buf.room_mut(len).copy_from_slice(payload);
        buf.data_len = len;
        buf.pkt_len = u32::from(len);
        Some(buf)
    }

    #[inline]
    pub fn headroom(&self) -> u16 {
        self.headroom
    }

    #[inline]
    pub fn dataroom(&self) -> u16 {
        (self.storage.len() - usize::from(self.headroom)) as u16
    }

    /// Returns the segment to a freshly allocated state. The chain must already be split off.
    pub fn reset(&mut self) {
        debug_assert!(self.next.is_none());
        self.data_off = self.headroom;
        self.data_len = 0;
        self.pkt_len = 0;
        self.nb_segs = 1;
        self.ol_flags = OlFlags::empty();
        self.tx = TxLengths::default();
        self.packet_type = 0;
        self.hash = 0;
    }

    /// The first `len` bytes of the data room, i.e. starting right after the headroom.
    #[inline]
    pub fn room_mut(&mut self, len: u16) -> &mut [u8] {
        let start = usize::from(self.headroom);
        &mut self.storage[start..start + usize::from(len)]
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        let start = usize::from(self.data_off);
        &self.storage[start..start + usize::from(self.data_len)]
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let start = usize::from(self.data_off);
        &mut self.storage[start..start + usize::from(self.data_len)]
    }

    /// Bytes from the start of the storage up to the end of this segment's data.
    #[inline]
    pub fn storage(&self) -> &[u8] {
        &self.storage[..usize::from(self.data_off) + usize::from(self.data_len)]
    }

    /// Grows the segment's data `len` bytes to the front, returning the new leading bytes.
    pub fn prepend(&mut self, len: u16) -> Option<&mut [u8]> {
        if self.data_off < len {
            return None;
        }
        self.data_off -= len;
        self.data_len += len;
        self.pkt_len += u32::from(len);
        let start = usize::from(self.data_off);
        Some(&mut self.storage[start..start + usize::from(len)])
    }

    /// Links `seg` after the last segment of this chain. Lengths and counts are left untouched.
    pub fn append_segment(&mut self, seg: PktBuf) {
        let mut slot = &mut self.next;
        while let Some(node) = slot {
            slot = &mut node.next;
        }
        *slot = Some(Box::new(seg));
    }

    pub fn next(&self) -> Option<&PktBuf> {
        self.next.as_deref()
    }

    pub fn take_next(&mut self) -> Option<PktBuf> {
        self.next.take().map(|seg| *seg)
    }

    /// Iterates this segment and every segment chained after it.
    pub fn segments(&self) -> impl Iterator<Item = &PktBuf> {
        core::iter::successors(Some(self), |seg| seg.next())
    }

    /// Splits the chain into its individual segments.
    pub fn into_segments(mut self) -> Vec<PktBuf> {
        let mut out = Vec::with_capacity(usize::from(self.nb_segs.max(1)));
        let mut next = self.take_next();
        out.push(self);
        while let Some(mut seg) = next {
            next = seg.take_next();
            out.push(seg);
        }
        out
    }

    /// Gathers the data of every segment into one vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pkt_len as usize);
        for seg in self.segments() {
            out.extend_from_slice(seg.data());
        }
        out
    }
}

impl core::fmt::Debug for PktBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PktBuf")
            .field("data_off", &self.data_off)
            .field("data_len", &self.data_len)
            .field("pkt_len", &self.pkt_len)
            .field("nb_segs", &self.nb_segs)
            .field("ol_flags", &self.ol_flags)
            .field("tx", &self.tx)
            .field("chained", &self.next.is_some())
            .finish()
    }
}
