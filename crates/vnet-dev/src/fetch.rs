//! Mirrors newly published descriptors into the shadow ring.

use core::sync::atomic::Ordering;

use tracing::trace;
use vnet_buf::BufferSource;
use vnet_dma::VirtualChannel;
use vnet_wire::offset;

use crate::queue::Queue;

/// Slots the peer has published that no fetch has targeted yet, and the offset of the first one.
fn unfetched(q: &Queue) -> (u16, u16) {
    let sd_desc_off = q.sd_desc.off(Ordering::Relaxed);
    let pend = q.sd_desc.pend();
    let published = offset::diff(q.peer_next_off(), sd_desc_off, q.q_sz);
    (
        offset::add(sd_desc_off, pend, q.q_sz),
        published.saturating_sub(pend),
    )
}

/// Stages the descriptor copies for `nb` slots starting at `start`. At most two copies: the run
/// is split where it crosses the ring end.
fn stage_desc_copies(q: &mut Queue, dev2mem: &mut VirtualChannel, start: u16, nb: u16) -> u16 {
    let q_sz = usize::from(q.q_sz);
    let mut idx = q.idx(start);
    let mut left = usize::from(nb);
    let mut copies = 0;

    while left > 0 {
        let run = left.min(q_sz - idx);
        let src = q.desc_addr(idx);
        let slots = &mut q.descs[idx..idx + run];
        for desc in slots.iter_mut() {
            desc.invalidate();
        }
        dev2mem.enqueue_read(src, bytemuck::cast_slice_mut(slots));
        copies += 1;
        left -= run;
        idx = 0;
    }

    let sd_desc_off = q.sd_desc.off(Ordering::Relaxed);
    let target = offset::add(sd_desc_off, q.sd_desc.pend() + nb, q.q_sz);
    q.sd_desc.issue(nb);
    dev2mem.record(&q.sd_desc, target, nb);
    trace!(dev = q.dev_id, queue = q.qid, nb, copies, "descriptor fetch staged");
    copies
}

/// Fetches descriptors of a device → peer queue. Returns the number of copies staged.
pub(crate) fn fetch_enq_desc_prep(q: &mut Queue, dev2mem: &mut VirtualChannel) -> u16 {
    let (start, nb) = unfetched(q);
    if nb == 0 {
        return 0;
    }
    stage_desc_copies(q, dev2mem, start, nb)
}

/// Fetches descriptors of a peer → device queue, giving every targeted slot a buffer to receive
/// the payload into.
///
/// Buffers are requested in at most two bulk calls, split at the ring end. If the first call
/// fails nothing is fetched; if the second fails only the first run is.
pub(crate) fn fetch_deq_desc_prep(
    q: &mut Queue,
    source: &mut BufferSource,
    dev2mem: &mut VirtualChannel,
) -> u16 {
    let (start, mut nb) = unfetched(q);
    if nb == 0 {
        return 0;
    }

    let idx = q.idx(start);
    let first = usize::from(nb).min(usize::from(q.q_sz) - idx);
    debug_assert!(q.bufs[idx..idx + first].iter().all(Option::is_none));
    if let Err(err) = source.get_bulk(&mut q.bufs[idx..idx + first]) {
        q.stats.alloc_failures += 1;
        trace!(dev = q.dev_id, queue = q.qid, %err, "no buffers for descriptor fetch");
        return 0;
    }
    let second = usize::from(nb) - first;
    if second > 0 && source.get_bulk(&mut q.bufs[..second]).is_err() {
        q.stats.alloc_failures += 1;
        nb = first as u16;
    }

    stage_desc_copies(q, dev2mem, start, nb)
}
