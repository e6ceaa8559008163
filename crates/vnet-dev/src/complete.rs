//! Hands consumed descriptors back to the peer by writing the shadow copies over the ring.

use tracing::trace;
use vnet_buf::BufferSource;
use vnet_dma::VirtualChannel;
use vnet_wire::desc::DESC_META_OFFSET;
use vnet_wire::offset;

use crate::queue::Queue;

/// Writes `n` whole shadow descriptors starting at `from` back to the ring. At most two copies.
pub(crate) fn write_back_runs(q: &Queue, mem2dev: &mut VirtualChannel, from: u16, n: u16) -> u16 {
    let first = offset::diff_no_wrap(offset::add(from, n, q.q_sz), from, q.q_sz).min(n);
    let mut copies = 0;
    for (idx, len) in [(q.idx(from), first), (0, n - first)] {
        if len == 0 {
            continue;
        }
        let run = &q.descs[idx..idx + usize::from(len)];
        mem2dev.enqueue_write(bytemuck::cast_slice(run), q.desc_addr(idx));
        copies += 1;
    }
    copies
}

/// Completes the peer → device run `[from, to)` for a peer that negotiated in-order use.
///
/// One used element covers the run: the first descriptor takes the id of the last one, is
/// flipped to used, and only its `len`/`id`/`flags` word is written back. The peer skips the
/// rest of the run by buffer id.
pub(crate) fn mark_deq_compl_in_order(
    q: &mut Queue,
    mem2dev: &mut VirtualChannel,
    from: u16,
    to: u16,
) -> u16 {
    let n = offset::diff(to, from, q.q_sz);
    if n == 0 {
        return 0;
    }
    let first = q.idx(from);
    let last = q.idx(offset::add(from, n - 1, q.q_sz));
    let id = q.descs[last].id();
    q.descs[first].set_id(id);
    q.descs[first].set_used_from_avail();
    q.check_consumed(first, from);

    let meta = q.descs[first].meta_bytes();
    mem2dev.enqueue_write(&meta, q.desc_addr(first) + DESC_META_OFFSET as u64);
    trace!(dev = q.dev_id, queue = q.qid, n, id, "collapsed completion staged");
    1
}

/// Completes the run `[from, to)` descriptor by descriptor, for a peer that may use buffers in
/// any order. Every descriptor is written back whole, in at most two copies.
///
/// The flags were already flipped when the payload copies were staged.
pub(crate) fn mark_deq_compl_out_of_order(
    q: &mut Queue,
    mem2dev: &mut VirtualChannel,
    from: u16,
    to: u16,
) -> u16 {
    let n = offset::diff(to, from, q.q_sz);
    for i in 0..n {
        let off = offset::add(from, i, q.q_sz);
        q.check_consumed(q.idx(off), off);
    }
    write_back_runs(q, mem2dev, from, n)
}

/// Completes the device → peer run `[from, to)`: descriptors were filled and flipped by the
/// enqueue path, so they are only checked, their retained buffers freed, and written back.
pub(crate) fn mark_enq_compl(
    q: &mut Queue,
    source: &mut BufferSource,
    mem2dev: &mut VirtualChannel,
    from: u16,
    to: u16,
) -> u16 {
    let n = offset::diff(to, from, q.q_sz);
    for i in 0..n {
        let off = offset::add(from, i, q.q_sz);
        let idx = q.idx(off);
        q.check_consumed(idx, off);
        if !q.auto_free {
            if let Some(buf) = q.bufs[idx].take() {
                source.put(buf);
            }
        }
    }
    write_back_runs(q, mem2dev, from, n)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use vnet_dma::{DenseMemory, RemoteMemory, SoftCopyEngine};
    use vnet_wire::{DescFlags, PackedDesc, DESC_SIZE};

    use super::*;
    use crate::hash::HashReportTable;
    use crate::queue::QueueParams;
    use crate::signal::PeerSignals;

    const RING: u64 = 0x1000;

    fn queue(q_sz: u16) -> Queue {
        Queue::new(QueueParams {
            qid: 1,
            dev_id: 0,
            q_sz,
            desc_base: RING,
            driver_area: 0,
            headroom: 128,
            buf_len: 2048,
            hdr_len: 12,
            auto_free: true,
            signals: PeerSignals::new(2, 0),
            hash_report: Arc::new(HashReportTable::new()),
        })
    }

    fn channel() -> (VirtualChannel, Arc<Mutex<DenseMemory>>) {
        let mem = Arc::new(Mutex::new(DenseMemory::new(0x4000).unwrap()));
        let engine = SoftCopyEngine::new(Arc::clone(&mem));
        (VirtualChannel::new(0, Box::new(engine)), mem)
    }

    fn read_desc(mem: &Arc<Mutex<DenseMemory>>, idx: u64) -> PackedDesc {
        let mut raw = [0u8; DESC_SIZE];
        mem.lock()
            .unwrap()
            .read_into(RING + idx * DESC_SIZE as u64, &mut raw)
            .unwrap();
        bytemuck::pod_read_unaligned(&raw)
    }

    #[test]
    fn out_of_order_run_splits_at_ring_end() {
        let mut q = queue(8);
        for (i, desc) in q.descs.iter_mut().enumerate() {
            // Slots 6 and 7 are on the first lap, 0 and 1 on the second.
            let wrap = i >= 6;
            *desc = PackedDesc::available(0x100 * i as u64, 64, i as u16, DescFlags::empty(), wrap);
            desc.set_used_from_avail();
        }
        let (mut chan, mem) = channel();
        let copies = mark_deq_compl_out_of_order(&mut q, &mut chan, 0x8006, 0x0002);
        assert_eq!(copies, 2);
        assert!(chan.submit_pending());
        chan.poll(true);

        for idx in [6, 7, 0, 1] {
            let d = read_desc(&mem, idx);
            assert_eq!(d.is_used(), d.is_avail(), "slot {idx}");
            assert_eq!(d.id(), idx as u16);
        }
        assert_eq!(read_desc(&mem, 2), PackedDesc::default());
    }

    #[test]
    fn in_order_carries_last_id_in_first_slot() {
        let mut q = queue(8);
        for (i, desc) in q.descs.iter_mut().take(3).enumerate() {
            *desc = PackedDesc::available(0x100, 64, 10 + i as u16, DescFlags::empty(), true);
        }
        let (mut chan, mem) = channel();
        assert_eq!(mark_deq_compl_in_order(&mut q, &mut chan, 0x8000, 0x8003), 1);
        assert!(chan.submit_pending());
        chan.poll(true);

        let first = read_desc(&mem, 0);
        assert_eq!(first.id(), 12);
        assert!(first.is_used() && first.is_avail());
        // Only the metadata word is written; the address stays untouched.
        assert_eq!(first.addr(), 0);
        assert_eq!(read_desc(&mem, 1), PackedDesc::default());
        // The shadow keeps the rest of the run as it was.
        assert!(!q.descs[1].is_used());
    }
}
