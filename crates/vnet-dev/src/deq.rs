//! Peer → device path: stage payload copies for fetched descriptors and hand finished packets
//! to the consumer.

use core::sync::atomic::Ordering;

use tracing::warn;
use vnet_buf::{BufferSource, PktBuf};
use vnet_dma::{VirtualChannel, MAX_POINTERS};
use vnet_wire::desc::set_used_from_avail_x4;
use vnet_wire::{offset, PackedDesc};

use crate::mode::{has, DeqMode};
use crate::queue::Queue;
use crate::transform::post_process;

/// Most slots one call stages payload copies for.
pub const HOST_DATA_HINT: u16 = 128;

/// Fills in the head metadata of a slot buffer whose first `staged` bytes hold `len` bytes of
/// descriptor payload, header included.
fn set_head_meta(q: &Queue, buf: &mut PktBuf, staged: u16, len: u32) {
    let hdr = q.hdr_len;
    if staged < hdr {
        // Runt: the header must still parse, as zeroes.
        buf.room_mut(hdr)[usize::from(staged)..].fill(0);
    }
    buf.data_off = q.headroom + hdr;
    buf.data_len = staged.saturating_sub(hdr);
    buf.pkt_len = len.saturating_sub(u32::from(hdr));
}

/// Stages payload copies for slots whose descriptors have landed but whose data has not been
/// requested yet.
///
/// Returns the populated offset (`sd_mbuf_off`) observed before anything new was staged.
pub(crate) fn fetch_host_data<const F: u8>(
    q: &mut Queue,
    source: &mut BufferSource,
    dev2mem: &mut VirtualChannel,
) -> u16 {
    let ooo = has(F, DeqMode::OUT_OF_ORDER.bits());
    let q_sz = q.q_sz;
    let buf_len = u32::from(q.buf_len);
    let sd_mbuf_off = q.sd_mbuf.off(Ordering::Relaxed);
    let start = offset::add(sd_mbuf_off, q.sd_mbuf.pend(), q_sz);
    let sd_desc_off = q.sd_desc.off(Ordering::Acquire);
    let nb = offset::diff(sd_desc_off, start, q_sz).min(HOST_DATA_HINT);
    let mut used: u16 = 0;
    // Operation holding the most recent copy; a later flush may leave `tail` empty.
    let mut last_op = dev2mem.tail();

    while nb - used >= 4 {
        let off = offset::add(start, used, q_sz);
        let idx = q.idx(off);
        if idx + 3 >= usize::from(q_sz) {
            break;
        }
        if q.descs[idx..idx + 4].iter().any(|d| d.len() > buf_len) {
            break;
        }
        if !dev2mem.flush(4) {
            break;
        }
        for lane in 0..4 {
            q.check_avail(idx + lane, offset::add(off, lane as u16, q_sz));
        }
        if ooo {
            if let Ok(quad) = <&mut [PackedDesc; 4]>::try_from(&mut q.descs[idx..idx + 4]) {
                set_used_from_avail_x4(quad);
            }
        }
        for lane in 0..4 {
            let desc = q.descs[idx + lane];
            let len = desc.len() as u16;
            let Some(mut buf) = q.bufs[idx + lane].take() else {
                q.missing_buffer(idx + lane);
            };
            dev2mem.enqueue_read(desc.addr(), buf.room_mut(len));
            set_head_meta(q, &mut buf, len, desc.len());
            q.bufs[idx + lane] = Some(buf);
        }
        last_op = dev2mem.tail();
        used += 4;
    }

    while used < nb {
        let off = offset::add(start, used, q_sz);
        let idx = q.idx(off);
        let desc = q.descs[idx];
        let len = desc.len();

        let mut extras = 0usize;
        let mut len_eff = len;
        if len > buf_len {
            extras = (len - buf_len).div_ceil(buf_len.max(1)) as usize;
            if extras + 1 > MAX_POINTERS {
                extras = MAX_POINTERS - 1;
                len_eff = buf_len * MAX_POINTERS as u32;
                q.stats.truncated += 1;
                warn!(
                    dev = q.dev_id,
                    queue = q.qid,
                    len,
                    kept = len_eff,
                    "descriptor payload exceeds one copy, truncating"
                );
            }
        }
        if !dev2mem.flush(extras + 1) {
            break;
        }
        let mut segs: [Option<PktBuf>; MAX_POINTERS - 1] = Default::default();
        let segs = &mut segs[..extras];
        if extras > 0 && source.get_bulk(segs).is_err() {
            q.stats.alloc_failures += 1;
            break;
        }

        q.check_avail(idx, off);
        if ooo {
            q.descs[idx].set_used_from_avail();
        }

        let Some(mut head) = q.bufs[idx].take() else {
            q.missing_buffer(idx);
        };
        let staged = len_eff.min(buf_len) as u16;
        dev2mem.enqueue_read(desc.addr(), head.room_mut(staged));
        let mut left = len_eff - u32::from(staged);
        for mut seg in segs.iter_mut().filter_map(Option::take) {
            let n = left.min(buf_len) as u16;
            dev2mem.enqueue_read_dst(seg.room_mut(n));
            seg.data_len = n;
            seg.pkt_len = u32::from(n);
            head.append_segment(seg);
            head.nb_segs += 1;
            left -= u32::from(n);
        }
        set_head_meta(q, &mut head, staged, len_eff);
        q.bufs[idx] = Some(head);
        last_op = dev2mem.tail();
        used += 1;
    }

    if used > 0 {
        q.sd_mbuf.issue(used);
        dev2mem.record_for(last_op, &q.sd_mbuf, offset::add(start, used, q_sz), used);
    }
    sd_mbuf_off
}

/// Dequeues up to `max` packets the peer transmitted into `out`. Returns the number appended.
pub(crate) fn dequeue<const F: u8>(
    q: &mut Queue,
    source: &mut BufferSource,
    dev2mem: &mut VirtualChannel,
    out: &mut Vec<PktBuf>,
    max: u16,
) -> u16 {
    debug_assert_eq!(
        has(F, DeqMode::EXTBUF.bits()),
        source.is_external(),
        "dequeue mode does not match the buffer source"
    );
    dev2mem.poll(false);
    let populated = fetch_host_data::<F>(q, source, dev2mem);
    let last_off = q.last_off.load(Ordering::Relaxed);
    let ready = offset::diff(populated, last_off, q.q_sz);
    if ready == 0 || max == 0 {
        return 0;
    }
    let (consumed, produced) = post_process::<F>(q, out, ready, max);
    q.last_off
        .store(offset::add(last_off, consumed, q.q_sz), Ordering::Release);
    produced
}
