//! Device → peer path: copy packets into receive buffers the peer posted.

use core::sync::atomic::Ordering;

use tracing::debug;
use vnet_buf::{BufferSource, OlFlags, PktBuf};
use vnet_dma::{VirtualChannel, MAX_POINTERS};
use vnet_wire::hdr::VIRTIO_NET_HDR_F_DATA_VALID;
use vnet_wire::{offset, VirtioNetHdr};

use crate::mode::{has, EnqMode};
use crate::queue::Queue;

/// Why a packet was not placed on the ring.
enum Placement {
    /// Written over this many descriptors.
    Placed(u16),
    /// Not enough published descriptors yet; try again later.
    Later,
    /// Can never fit; dropped.
    Drop(&'static str),
}

/// Number of consecutive descriptors from `idx` whose buffers together hold `need` bytes.
fn descriptors_needed<const F: u8>(q: &Queue, mut idx: usize, avail: u16, need: u32) -> Placement {
    let mask = usize::from(q.q_sz) - 1;
    if avail == 0 {
        return Placement::Later;
    }
    if !has(F, EnqMode::MSEG.bits()) {
        return if q.descs[idx].len() >= need {
            Placement::Placed(1)
        } else {
            Placement::Drop("packet larger than receive buffer")
        };
    }
    let mut room = 0u32;
    for n in 1..=avail {
        room += q.descs[idx].len();
        if room >= need {
            return Placement::Placed(n);
        }
        idx = (idx + 1) & mask;
    }
    if avail == q.q_sz {
        Placement::Drop("packet larger than the whole ring")
    } else {
        Placement::Later
    }
}

fn build_hdr<const F: u8>(q: &Queue, pkt: &PktBuf, num_buffers: u16) -> VirtioNetHdr {
    let mut hdr = VirtioNetHdr {
        num_buffers,
        ..VirtioNetHdr::default()
    };
    if has(F, EnqMode::CSUM.bits()) && pkt.ol_flags.contains(OlFlags::RX_L4_CKSUM_GOOD) {
        hdr.flags |= VIRTIO_NET_HDR_F_DATA_VALID;
    }
    if has(F, EnqMode::HASH_REPORT.bits()) && pkt.ol_flags.contains(OlFlags::RX_RSS_HASH) {
        hdr.hash_value = pkt.hash;
        hdr.hash_report = q.hash_report.get(pkt.packet_type) as u16;
    }
    hdr
}

/// Copies up to the whole of `pkts` into the ring, oldest first. Packets that cannot be placed
/// yet stay in `pkts`; packets that can never be placed are dropped and released.
///
/// Returns the number of packets placed.
pub(crate) fn enqueue<const F: u8>(
    q: &mut Queue,
    source: &mut BufferSource,
    mem2dev: &mut VirtualChannel,
    pkts: &mut Vec<PktBuf>,
) -> u16 {
    debug_assert_eq!(!has(F, EnqMode::NO_AUTO_FREE.bits()), q.auto_free);
    mem2dev.poll(false);

    let q_sz = q.q_sz;
    let mask = usize::from(q_sz) - 1;
    let hdr_len = q.hdr_len;
    let sd_mbuf_off = q.sd_mbuf.off(Ordering::Relaxed);
    let start = offset::add(sd_mbuf_off, q.sd_mbuf.pend(), q_sz);
    let avail = offset::diff(q.sd_desc.off(Ordering::Acquire), start, q_sz);
    let mut used: u16 = 0;
    let mut placed: u16 = 0;
    // Operation holding the most recent write; a later flush may leave `tail` empty.
    let mut last_op = mem2dev.tail();

    let mut iter = core::mem::take(pkts).into_iter();
    while let Some(mut pkt) = iter.next() {
        let off = offset::add(start, used, q_sz);
        let first = q.idx(off);
        let payload = pkt.pkt_len;
        let need = payload + u32::from(hdr_len);

        let ndesc = match descriptors_needed::<F>(q, first, avail - used, need) {
            Placement::Placed(n) => n,
            Placement::Later => {
                pkts.push(pkt);
                break;
            }
            Placement::Drop(reason) => {
                debug!(dev = q.dev_id, queue = q.qid, len = payload, reason, "dropping packet");
                q.stats.drops += 1;
                source.put(pkt);
                continue;
            }
        };

        let ptrs = usize::from(pkt.nb_segs) + usize::from(ndesc) - 1;
        if ptrs > MAX_POINTERS {
            debug!(dev = q.dev_id, queue = q.qid, ptrs, "dropping packet with too many pieces");
            q.stats.drops += 1;
            source.put(pkt);
            continue;
        }
        if !mem2dev.flush(ptrs) {
            pkts.push(pkt);
            break;
        }

        if hdr_len > 0 {
            let hdr = build_hdr::<F>(q, &pkt, ndesc);
            let Some(bytes) = pkt.prepend(hdr_len) else {
                debug!(dev = q.dev_id, queue = q.qid, "no headroom for virtio-net header");
                q.stats.drops += 1;
                source.put(pkt);
                continue;
            };
            hdr.write_le(bytes);
        }

        let mut d = 0usize;
        let mut idx = first;
        let mut written = 0u32;
        for seg in pkt.segments() {
            let mut data = seg.data();
            while !data.is_empty() {
                let room = q.descs[idx].len() - written;
                if room == 0 {
                    q.check_avail(idx, offset::add(off, d as u16, q_sz));
                    q.descs[idx].set_len(written);
                    q.descs[idx].set_used_from_avail();
                    d += 1;
                    idx = (idx + 1) & mask;
                    written = 0;
                    continue;
                }
                let n = data.len().min(room as usize);
                mem2dev.enqueue_write(&data[..n], q.descs[idx].addr() + u64::from(written));
                written += n as u32;
                data = &data[n..];
            }
        }
        q.check_avail(idx, offset::add(off, d as u16, q_sz));
        q.descs[idx].set_len(written);
        q.descs[idx].set_used_from_avail();
        debug_assert_eq!(d + 1, usize::from(ndesc));
        last_op = mem2dev.tail();

        q.stats.packets += 1;
        q.stats.bytes += u64::from(payload);
        if q.auto_free {
            source.put(pkt);
        } else {
            debug_assert!(q.bufs[first].is_none());
            q.bufs[first] = Some(pkt);
        }
        used += ndesc;
        placed += 1;
    }
    pkts.extend(iter);

    if used > 0 {
        q.sd_mbuf.issue(used);
        mem2dev.record_for(last_op, &q.sd_mbuf, offset::add(start, used, q_sz), used);
    }
    placed
}
