//! Descriptor management: keeps every active pair's shadow rings fed and completed.

use core::sync::atomic::Ordering;

use vnet_buf::BufferSource;
use vnet_dma::{VirtualChannel, MAX_POINTERS};

use crate::complete::{mark_deq_compl_in_order, mark_deq_compl_out_of_order, mark_enq_compl};
use crate::dma::VchanPair;
use crate::fetch::{fetch_deq_desc_prep, fetch_enq_desc_prep};
use crate::mode::{has, MgmtMode};
use crate::queue::Queue;
use crate::signal::INTR_RAISE;

fn complete_deq<const M: u8>(q: &mut Queue, mem2dev: &mut VirtualChannel) {
    let ooo = has(M, MgmtMode::OUT_OF_ORDER.bits());
    let last_off = q.last_off.load(Ordering::Acquire);
    if last_off == q.compl_off {
        return;
    }
    if !mem2dev.flush(if ooo { 2 } else { 1 }) {
        return;
    }
    let from = q.compl_off;
    if ooo {
        mark_deq_compl_out_of_order(q, mem2dev, from, last_off);
    } else {
        mark_deq_compl_in_order(q, mem2dev, from, last_off);
    }
    q.compl_off = last_off;
}

/// Signals the peer once the previous write-back landed, then writes back whatever the enqueue
/// path filled since.
fn complete_enq(q: &mut Queue, source: &mut BufferSource, mem2dev: &mut VirtualChannel) {
    if let (Some(line), Some(op)) = (q.cb_intr, q.pend_compl) {
        if mem2dev.op_status(op) {
            if let Some(bell) = q.signals.doorbell(q.qid) {
                bell.set_cb_notify(1);
            }
            if let Some(intr) = q.signals.intr(line) {
                intr.raise(INTR_RAISE);
            }
            q.pend_compl = None;
        }
    }

    let filled = q.sd_mbuf.off(Ordering::Acquire);
    if filled == q.compl_off || !mem2dev.flush(2) {
        return;
    }
    let from = q.compl_off;
    mark_enq_compl(q, source, mem2dev, from, filled);
    q.compl_off = filled;
    q.pend_compl = Some(mem2dev.tail());
}

/// Polls both directions, fetches new descriptors and completes finished runs for the first
/// `qp_count` queue pairs.
pub(crate) fn desc_manage<const M: u8>(
    queues: &mut [Option<Queue>],
    source: &mut BufferSource,
    pair: &mut VchanPair,
    qp_count: u16,
) {
    debug_assert_eq!(has(M, MgmtMode::EXTBUF.bits()), source.is_external());
    pair.dev2mem.poll(true);
    pair.mem2dev.poll(true);

    for qp in 0..usize::from(qp_count) {
        let (enq_qid, deq_qid) = (qp * 2, qp * 2 + 1);

        if let Some(Some(q)) = queues.get_mut(enq_qid) {
            if pair.dev2mem.flush(MAX_POINTERS) {
                fetch_enq_desc_prep(q, &mut pair.dev2mem);
            }
        }
        if let Some(Some(q)) = queues.get_mut(deq_qid) {
            if pair.dev2mem.flush(MAX_POINTERS) {
                fetch_deq_desc_prep(q, source, &mut pair.dev2mem);
            }
            complete_deq::<M>(q, &mut pair.mem2dev);
        }
        if let Some(Some(q)) = queues.get_mut(enq_qid) {
            complete_enq(q, source, &mut pair.mem2dev);
        }
    }
}
