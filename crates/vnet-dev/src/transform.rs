//! Turns shadow slots whose payload has landed into packets for the consumer.
//!
//! Slots are taken four at a time while the quad is regular: no chained descriptor, no ring-end
//! crossing, no segmentation request and only the two checksum offsets the batch decoder knows.
//! Anything else goes through the scalar path, which also assembles descriptor chains.

use core::sync::atomic::Ordering;

use vnet_buf::{OlFlags, PktBuf, TxLengths};
use vnet_wire::hdr::{
    VirtioNetHdr, CSUM_OFFSET_TCP, CSUM_OFFSET_UDP, VIRTIO_NET_HDR_GSO_NONE,
    VIRTIO_NET_HDR_GSO_TCPV4, VIRTIO_NET_HDR_GSO_TCPV6, VIRTIO_NET_HDR_GSO_UDP,
};

use crate::mode::{has, DeqMode};
use crate::queue::Queue;

const IPV4_HDR_LEN: u16 = 20;
const IPV6_HDR_LEN: u16 = 40;

/// Offload request derived from one virtio-net header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOffload {
    pub ol_flags: OlFlags,
    pub lengths: TxLengths,
}

impl TxOffload {
    pub fn apply(&self, pkt: &mut PktBuf) {
        pkt.ol_flags |= self.ol_flags;
        pkt.tx = self.lengths;
    }
}

/// The two header fields the batch decoder looks at, one lane per packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HdrLanes {
    pub csum_start: [u16; 4],
    pub csum_offset: [u16; 4],
}

impl HdrLanes {
    pub fn from_headers(hdrs: &[VirtioNetHdr; 4]) -> Self {
        Self {
            csum_start: hdrs.map(|h| h.csum_start),
            csum_offset: hdrs.map(|h| h.csum_offset),
        }
    }
}

/// Lane tag → offload flags. Tag 0 means no checksum request.
const TAG_FLAGS: [OlFlags; 3] = [OlFlags::empty(), OlFlags::TX_IPV4_UDP, OlFlags::TX_IPV4_TCP];

fn lane_result(tag: u32, l2_len: u16) -> TxOffload {
    if tag == 0 {
        return TxOffload::default();
    }
    TxOffload {
        ol_flags: TAG_FLAGS[tag as usize],
        lengths: TxLengths {
            l2_len,
            l3_len: IPV4_HDR_LEN,
            ..TxLengths::default()
        },
    }
}

/// Decoder for four checksum requests at once. Returns `None` when any lane is irregular.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batch4Decoder {
    Portable,
    #[cfg(target_arch = "x86_64")]
    Sse2,
}

impl Batch4Decoder {
    /// Best decoder the running CPU supports.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        if std::arch::is_x86_feature_detected!("sse2") {
            return Self::Sse2;
        }
        Self::Portable
    }

    #[inline]
    pub fn decode(self, lanes: &HdrLanes) -> Option<[TxOffload; 4]> {
        match self {
            Self::Portable => decode_portable(lanes),
            #[cfg(target_arch = "x86_64")]
            // SAFETY: only selected by `detect` after SSE2 was found.
            Self::Sse2 => unsafe { sse2::decode(lanes) },
        }
    }
}

fn decode_portable(lanes: &HdrLanes) -> Option<[TxOffload; 4]> {
    let mut out = [TxOffload::default(); 4];
    for (lane, slot) in out.iter_mut().enumerate() {
        let start = lanes.csum_start[lane];
        let tag = match lanes.csum_offset[lane] {
            0 => continue,
            CSUM_OFFSET_UDP => 1,
            CSUM_OFFSET_TCP => 2,
            _ => return None,
        };
        if start < IPV4_HDR_LEN {
            return None;
        }
        *slot = lane_result(tag, start - IPV4_HDR_LEN);
    }
    Some(out)
}

#[cfg(target_arch = "x86_64")]
mod sse2 {
    use core::arch::x86_64::*;

    use super::{lane_result, HdrLanes, TxOffload, IPV4_HDR_LEN};
    use vnet_wire::hdr::{CSUM_OFFSET_TCP, CSUM_OFFSET_UDP};

    #[inline]
    fn lanes_i32(v: [u16; 4]) -> [i32; 4] {
        v.map(i32::from)
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn decode(lanes: &HdrLanes) -> Option<[TxOffload; 4]> {
        let s = lanes_i32(lanes.csum_start);
        let o = lanes_i32(lanes.csum_offset);
        let start = _mm_set_epi32(s[3], s[2], s[1], s[0]);
        let off = _mm_set_epi32(o[3], o[2], o[1], o[0]);
        let ones = _mm_set1_epi32(-1);

        let inactive = _mm_cmpeq_epi32(off, _mm_setzero_si128());
        let is_udp = _mm_cmpeq_epi32(off, _mm_set1_epi32(i32::from(CSUM_OFFSET_UDP)));
        let is_tcp = _mm_cmpeq_epi32(off, _mm_set1_epi32(i32::from(CSUM_OFFSET_TCP)));
        let known = _mm_or_si128(_mm_or_si128(is_udp, is_tcp), inactive);
        let short = _mm_cmplt_epi32(start, _mm_set1_epi32(i32::from(IPV4_HDR_LEN)));
        let bad = _mm_or_si128(
            _mm_andnot_si128(known, ones),
            _mm_andnot_si128(inactive, short),
        );
        if _mm_movemask_epi8(bad) != 0 {
            return None;
        }

        let l2 = _mm_andnot_si128(
            inactive,
            _mm_sub_epi32(start, _mm_set1_epi32(i32::from(IPV4_HDR_LEN))),
        );
        let tag = _mm_or_si128(
            _mm_and_si128(is_udp, _mm_set1_epi32(1)),
            _mm_and_si128(is_tcp, _mm_set1_epi32(2)),
        );

        let mut l2_out = [0i32; 4];
        let mut tag_out = [0i32; 4];
        // SAFETY: both arrays are 16 bytes; the store is unaligned.
        unsafe {
            _mm_storeu_si128(l2_out.as_mut_ptr().cast::<__m128i>(), l2);
            _mm_storeu_si128(tag_out.as_mut_ptr().cast::<__m128i>(), tag);
        }

        let mut out = [TxOffload::default(); 4];
        for lane in 0..4 {
            out[lane] = lane_result(tag_out[lane] as u32, l2_out[lane] as u16);
        }
        Some(out)
    }
}

/// Offloads requested by one header, looked at field by field.
pub fn offload_from_hdr<const GSO: bool>(hdr: &VirtioNetHdr) -> TxOffload {
    if !hdr.has_csum_request() {
        return TxOffload::default();
    }
    let mut ol_flags = if hdr.csum_offset == CSUM_OFFSET_UDP {
        OlFlags::TX_IPV4_UDP
    } else {
        OlFlags::TX_IPV4_TCP
    };
    let mut lengths = TxLengths {
        l3_len: IPV4_HDR_LEN,
        ..TxLengths::default()
    };
    if GSO && hdr.gso_type != VIRTIO_NET_HDR_GSO_NONE {
        lengths.tso_segsz = hdr.gso_size;
        lengths.l4_len = hdr.hdr_len.saturating_sub(hdr.csum_start);
        match hdr.gso_type_base() {
            VIRTIO_NET_HDR_GSO_TCPV4 => ol_flags = OlFlags::TX_IPV4_TCP_TSO,
            VIRTIO_NET_HDR_GSO_TCPV6 => {
                lengths.l3_len = IPV6_HDR_LEN;
                ol_flags = OlFlags::TX_IPV6_TCP_TSO;
            }
            VIRTIO_NET_HDR_GSO_UDP => ol_flags = OlFlags::TX_IPV4_UDP_SEG,
            _ => {}
        }
    }
    // l3_len is final here.
    lengths.l2_len = hdr.csum_start.saturating_sub(lengths.l3_len);
    TxOffload { ol_flags, lengths }
}

fn read_hdr(q: &Queue, pkt: &PktBuf) -> Option<VirtioNetHdr> {
    let data_off = usize::from(pkt.data_off);
    let start = data_off.checked_sub(usize::from(q.hdr_len))?;
    VirtioNetHdr::from_slice_le(&pkt.storage()[start..data_off])
}

/// Gives a continuation slot's header bytes back to it: only a chain's head carries a header.
fn restore_continuation(q: &Queue, idx: usize, seg: &mut PktBuf) {
    let staged = q.descs[idx].len().min(u32::from(q.buf_len)) as u16;
    seg.data_off = q.headroom;
    seg.data_len = staged;
    seg.pkt_len = seg.segments().map(|s| u32::from(s.data_len)).sum();
}

/// Moves up to `max` packets out of the `nb` populated slots starting at `last_off` into `out`.
///
/// Returns `(consumed, produced)`: slots used and packets appended. A chain may take more slots
/// than packets; it is emitted whole or not at all.
pub(crate) fn post_process<const F: u8>(
    q: &mut Queue,
    out: &mut Vec<PktBuf>,
    nb: u16,
    max: u16,
) -> (u16, u16) {
    let csum = has(F, DeqMode::CSUM.bits());
    let gso = has(F, DeqMode::GSO.bits());
    let q_sz = usize::from(q.q_sz);
    let mask = q_sz - 1;
    let mut idx = q.idx(q.last_off.load(Ordering::Relaxed));
    let mut done: u16 = 0;
    let mut produced: u16 = 0;

    while nb - done >= 4 && max - produced >= 4 {
        if idx + 3 >= q_sz {
            break;
        }
        if q.descs[idx..idx + 4].iter().any(|d| d.has_next()) {
            break;
        }
        if csum {
            let mut hdrs = [VirtioNetHdr::default(); 4];
            for (lane, hdr) in hdrs.iter_mut().enumerate() {
                let Some(pkt) = q.bufs[idx + lane].as_ref() else {
                    q.missing_buffer(idx + lane);
                };
                *hdr = read_hdr(q, pkt).unwrap_or_default();
            }
            if gso && hdrs.iter().any(|h| h.gso_type != VIRTIO_NET_HDR_GSO_NONE) {
                break;
            }
            let Some(offloads) = q.decoder.decode(&HdrLanes::from_headers(&hdrs)) else {
                break;
            };
            for (lane, offload) in offloads.iter().enumerate() {
                if let Some(pkt) = q.bufs[idx + lane].as_mut() {
                    offload.apply(pkt);
                }
            }
        }
        for lane in 0..4 {
            let Some(pkt) = q.bufs[idx + lane].take() else {
                q.missing_buffer(idx + lane);
            };
            q.stats.bytes += u64::from(pkt.pkt_len);
            out.push(pkt);
        }
        done += 4;
        produced += 4;
        idx = (idx + 4) & mask;
    }

    'scalar: while done < nb && produced < max {
        let mut segs: u16 = 0;
        let mut tail = idx;
        while q.descs[tail].has_next() {
            segs += 1;
            if done + segs >= nb {
                break 'scalar;
            }
            tail = (tail + 1) & mask;
        }

        let Some(mut head) = q.bufs[idx].take() else {
            q.missing_buffer(idx);
        };
        for _ in 0..segs {
            idx = (idx + 1) & mask;
            let Some(mut seg) = q.bufs[idx].take() else {
                q.missing_buffer(idx);
            };
            restore_continuation(q, idx, &mut seg);
            head.nb_segs += seg.nb_segs;
            head.pkt_len += seg.pkt_len;
            seg.nb_segs = 1;
            head.append_segment(seg);
            done += 1;
        }

        if csum {
            if let Some(hdr) = read_hdr(q, &head) {
                let offload = if gso {
                    offload_from_hdr::<true>(&hdr)
                } else {
                    offload_from_hdr::<false>(&hdr)
                };
                offload.apply(&mut head);
            }
        }
        q.stats.bytes += u64::from(head.pkt_len);
        out.push(head);
        produced += 1;
        done += 1;
        idx = (idx + 1) & mask;
    }

    q.stats.packets += u64::from(produced);
    (done, produced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(csum_start: u16, csum_offset: u16) -> VirtioNetHdr {
        VirtioNetHdr {
            csum_start,
            csum_offset,
            ..VirtioNetHdr::default()
        }
    }

    fn decoders() -> Vec<Batch4Decoder> {
        let mut all = vec![Batch4Decoder::Portable];
        #[cfg(target_arch = "x86_64")]
        all.push(Batch4Decoder::detect());
        all
    }

    #[test]
    fn batch_matches_scalar_for_uniform_udp() {
        let hdrs = [hdr(34, 6); 4];
        let lanes = HdrLanes::from_headers(&hdrs);
        for decoder in decoders() {
            let batch = decoder.decode(&lanes).unwrap();
            for (lane, h) in hdrs.iter().enumerate() {
                assert_eq!(batch[lane], offload_from_hdr::<false>(h), "{decoder:?}");
            }
            assert_eq!(batch[0].ol_flags, OlFlags::TX_IPV4_UDP);
            assert_eq!(batch[0].lengths.l3_len, 20);
            assert_eq!(batch[0].lengths.l2_len, 14);
        }
    }

    #[test]
    fn batch_matches_scalar_for_mixed_lanes() {
        let hdrs = [hdr(34, 16), hdr(0, 0), hdr(38, 6), hdr(20, 16)];
        let lanes = HdrLanes::from_headers(&hdrs);
        for decoder in decoders() {
            let batch = decoder.decode(&lanes).unwrap();
            for (lane, h) in hdrs.iter().enumerate() {
                assert_eq!(batch[lane], offload_from_hdr::<false>(h), "lane {lane}");
            }
        }
    }

    #[test]
    fn irregular_lanes_reject_the_batch() {
        for decoder in decoders() {
            let odd_offset = [hdr(34, 6), hdr(34, 6), hdr(34, 8), hdr(34, 6)];
            assert!(decoder.decode(&HdrLanes::from_headers(&odd_offset)).is_none());
            let short_start = [hdr(34, 6), hdr(10, 6), hdr(34, 6), hdr(34, 6)];
            assert!(decoder.decode(&HdrLanes::from_headers(&short_start)).is_none());
        }
    }

    #[test]
    fn gso_tcpv6_uses_ipv6_header_length() {
        let h = VirtioNetHdr {
            csum_start: 54,
            csum_offset: 16,
            gso_type: VIRTIO_NET_HDR_GSO_TCPV6,
            gso_size: 1440,
            hdr_len: 74,
            ..VirtioNetHdr::default()
        };
        let off = offload_from_hdr::<true>(&h);
        assert_eq!(off.ol_flags, OlFlags::TX_IPV6_TCP_TSO);
        assert_eq!(
            off.lengths,
            TxLengths {
                l2_len: 14,
                l3_len: 40,
                l4_len: 20,
                tso_segsz: 1440,
            }
        );

        // Without segmentation negotiated the GSO fields are ignored.
        let plain = offload_from_hdr::<false>(&h);
        assert_eq!(plain.ol_flags, OlFlags::TX_IPV4_TCP);
        assert_eq!(plain.lengths.l3_len, 20);
        assert_eq!(plain.lengths.tso_segsz, 0);
    }

    #[test]
    fn zero_fields_mean_no_offload() {
        assert_eq!(offload_from_hdr::<true>(&hdr(0, 6)), TxOffload::default());
        assert_eq!(offload_from_hdr::<true>(&hdr(34, 0)), TxOffload::default());
    }

    #[test]
    fn gso_tcpv4_and_udp() {
        let mut h = hdr(34, 16);
        h.gso_type = VIRTIO_NET_HDR_GSO_TCPV4;
        h.gso_size = 1460;
        h.hdr_len = 54;
        let off = offload_from_hdr::<true>(&h);
        assert_eq!(off.ol_flags, OlFlags::TX_IPV4_TCP_TSO);
        assert_eq!(off.lengths.l4_len, 20);
        assert_eq!(off.lengths.l2_len, 14);

        let mut u = hdr(34, 6);
        u.gso_type = VIRTIO_NET_HDR_GSO_UDP;
        u.gso_size = 1400;
        u.hdr_len = 42;
        let off = offload_from_hdr::<true>(&u);
        assert_eq!(off.ol_flags, OlFlags::TX_IPV4_UDP_SEG);
        assert_eq!(off.lengths.l4_len, 8);
    }
}
