//! The device: feature negotiation, status transitions, queue lifecycle and control commands.
//!
//! A [`NetDev`] owns its queues and its buffer source. It never owns copy channels; every call
//! that moves bytes takes the worker's [`DmaChannels`] and looks up the pair configured in
//! [`NetDevConfig::dma_vchan`].

use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, error, info, warn};
use vnet_buf::{BufferSource, PktBuf};
use vnet_wire::event::EVENT_SIZE;
use vnet_wire::features::{
    self, bit, VIRTIO_F_IN_ORDER, VIRTIO_F_RING_PACKED, VIRTIO_F_VERSION_1, VIRTIO_NET_F_CSUM,
    VIRTIO_NET_F_CTRL_MAC_ADDR, VIRTIO_NET_F_CTRL_RX, VIRTIO_NET_F_CTRL_VLAN,
    VIRTIO_NET_F_CTRL_VQ, VIRTIO_NET_F_GUEST_CSUM, VIRTIO_NET_F_GUEST_HDRLEN,
    VIRTIO_NET_F_HASH_REPORT, VIRTIO_NET_F_HOST_TSO4, VIRTIO_NET_F_HOST_TSO6, VIRTIO_NET_F_MAC,
    VIRTIO_NET_F_MQ, VIRTIO_NET_F_MRG_RXBUF, VIRTIO_NET_F_MTU, VIRTIO_NET_F_RSS,
    VIRTIO_NET_F_SPEED_DUPLEX, VIRTIO_NET_F_STATUS,
};
use vnet_wire::hash::{
    VIRTIO_NET_HASH_TYPE_IPV4, VIRTIO_NET_HASH_TYPE_IPV6, VIRTIO_NET_HASH_TYPE_IP_EX,
    VIRTIO_NET_HASH_TYPE_TCPV4, VIRTIO_NET_HASH_TYPE_TCPV6, VIRTIO_NET_HASH_TYPE_TCP_EX,
    VIRTIO_NET_HASH_TYPE_UDPV4, VIRTIO_NET_HASH_TYPE_UDPV6, VIRTIO_NET_HASH_TYPE_UDP_EX,
};
use vnet_wire::{PackedDescEvent, VirtioNetHdr};

use crate::config::{LinkInfo, NetDevConfig, QueueConf};
use crate::ctrl::{CtrlAck, CtrlCommand, MacFilterKind, NetDevCallbacks, NoCallbacks, RssConfig};
use crate::dma::{copy_sync, drain, DmaChannels};
use crate::hash::HashReportTable;
use crate::mode::ModeSelection;
use crate::queue::{Queue, QueueOffsets, QueueParams, QueueState, QueueStats};
use crate::signal::{PeerSignals, INTR_RAISE, ISR_CONFIG_CHANGE};
use crate::{NetDevError, Result};

bitflags! {
    /// virtio device status byte. The empty value is a reset request.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct DeviceStatus: u8 {
        const ACKNOWLEDGE = 1;
        const DRIVER = 2;
        const DRIVER_OK = 4;
        const FEATURES_OK = 8;
        const NEEDS_RESET = 0x40;
        const FAILED = 0x80;
    }
}

/// `status` field of the config space.
pub const VIRTIO_NET_S_LINK_UP: u16 = 1;

/// Hash types the device can compute for RSS and hash reporting.
pub const SUPPORTED_HASH_TYPES: u32 = VIRTIO_NET_HASH_TYPE_IPV4
    | VIRTIO_NET_HASH_TYPE_TCPV4
    | VIRTIO_NET_HASH_TYPE_UDPV4
    | VIRTIO_NET_HASH_TYPE_IPV6
    | VIRTIO_NET_HASH_TYPE_TCPV6
    | VIRTIO_NET_HASH_TYPE_UDPV6
    | VIRTIO_NET_HASH_TYPE_IP_EX
    | VIRTIO_NET_HASH_TYPE_TCP_EX
    | VIRTIO_NET_HASH_TYPE_UDP_EX;

/// Device-specific configuration space, as the transport exposes it to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfigSpace {
    pub mac: [u8; 6],
    pub status: u16,
    pub max_virtqueue_pairs: u16,
    pub mtu: u16,
    /// Mbit/s; `u32::MAX` is unknown.
    pub speed: u32,
    /// 1 full, 0 half, 0xff unknown.
    pub duplex: u8,
    pub rss_max_key_size: u8,
    pub rss_max_indirection_table_length: u16,
    pub supported_hash_types: u32,
}

/// A virtio-net device whose rings live behind a copy engine.
pub struct NetDev {
    dev_id: u16,
    config: NetDevConfig,
    source: BufferSource,
    callbacks: Box<dyn NetDevCallbacks + Send>,
    signals: Arc<PeerSignals>,
    hash_report: Arc<HashReportTable>,

    device_features: u64,
    features: u64,
    features_ok: bool,
    status: DeviceStatus,
    link: LinkInfo,
    vq_pairs_set: u16,
    modes: ModeSelection,
    queues: Vec<Option<Queue>>,
}

impl NetDev {
    /// Creates a device with `nb_intrs` peer interrupt lines. Zero lines means the peer polls.
    pub fn new(
        dev_id: u16,
        config: NetDevConfig,
        source: BufferSource,
        nb_intrs: u16,
    ) -> Result<Self> {
        config.validate()?;
        if source.dataroom() == 0 {
            return Err(NetDevError::InvalidConfig("buffer source has no data room"));
        }
        let nb_queues = config.data_queues();
        let device_features = offered_features(&config);
        let modes = ModeSelection::from_features(0, config.auto_free, source.is_external());
        debug!(
            dev = dev_id,
            queues = nb_queues,
            features = device_features,
            "device created"
        );
        Ok(Self {
            dev_id,
            link: config.link,
            signals: PeerSignals::new(nb_queues, nb_intrs),
            hash_report: Arc::new(HashReportTable::new()),
            callbacks: Box::new(NoCallbacks),
            device_features,
            features: 0,
            features_ok: false,
            status: DeviceStatus::empty(),
            vq_pairs_set: 0,
            modes,
            queues: (0..nb_queues).map(|_| None).collect(),
            config,
            source,
        })
    }

    /// Installs the handlers for status changes and control commands.
    pub fn set_callbacks(&mut self, callbacks: Box<dyn NetDevCallbacks + Send>) {
        self.callbacks = callbacks;
    }

    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    pub fn config(&self) -> &NetDevConfig {
        &self.config
    }

    /// Notification words shared with the peer.
    pub fn signals(&self) -> &Arc<PeerSignals> {
        &self.signals
    }

    pub fn hash_report(&self) -> &Arc<HashReportTable> {
        &self.hash_report
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn device_features(&self) -> u64 {
        self.device_features
    }

    /// Negotiated features, or 0 until the driver is up.
    pub fn feature_bits(&self) -> u64 {
        if self.status.contains(DeviceStatus::DRIVER_OK) {
            self.features
        } else {
            0
        }
    }

    /// Accepts the feature set the peer settled on.
    pub fn negotiate(&mut self, features: u64) -> Result<()> {
        if features & !self.device_features != 0 {
            return Err(NetDevError::InvalidFeatures {
                negotiated: features,
                offered: self.device_features,
            });
        }
        for feature in features::iter_bits(features) {
            match features::feature_name(feature) {
                Some(name) => debug!(dev = self.dev_id, feature, name, "feature negotiated"),
                None => error!(dev = self.dev_id, feature, "unknown feature bit negotiated"),
            }
        }
        self.features = features;
        self.features_ok = true;
        let hdr_len = self.hdr_len();
        for q in self.queues.iter_mut().flatten() {
            q.hdr_len = hdr_len;
        }
        Ok(())
    }

    /// Size of the virtio-net header on every packet, 0 until features are accepted.
    pub fn hdr_len(&self) -> u16 {
        if self.features_ok {
            VirtioNetHdr::len_for(self.features) as u16
        } else {
            0
        }
    }

    /// Number of data queues in use, 0 until the driver is up.
    pub fn queue_count(&self) -> u16 {
        if !self.status.contains(DeviceStatus::DRIVER_OK) {
            0
        } else if self.vq_pairs_set != 0 {
            self.vq_pairs_set * 2
        } else {
            2
        }
    }

    pub fn vq_pairs_set(&self) -> u16 {
        self.vq_pairs_set
    }

    /// The dispatch entries currently in use.
    pub fn modes(&self) -> ModeSelection {
        self.modes
    }

    pub fn config_space(&self) -> NetConfigSpace {
        let rss = self.config.reta_size != 0;
        NetConfigSpace {
            mac: self.config.mac,
            status: if self.link.up { VIRTIO_NET_S_LINK_UP } else { 0 },
            max_virtqueue_pairs: self.config.max_queue_pairs,
            mtu: self.config.mtu,
            speed: self.link.speed_mbps,
            duplex: u8::from(self.link.full_duplex),
            rss_max_key_size: if rss { self.config.hash_key_size } else { 0 },
            rss_max_indirection_table_length: self.config.reta_size,
            supported_hash_types: if rss { SUPPORTED_HASH_TYPES } else { 0 },
        }
    }

    fn check_qid(&self, qid: u16) -> Result<()> {
        if usize::from(qid) >= self.queues.len() {
            return Err(NetDevError::InvalidQueue {
                qid,
                max: self.queues.len() as u16,
            });
        }
        Ok(())
    }

    /// Sets up queue `qid` from what the peer programmed. A queue that already exists is left as
    /// it is.
    pub fn configure(&mut self, qid: u16, conf: QueueConf, chans: &mut DmaChannels) -> Result<()> {
        self.check_qid(qid)?;
        conf.validate(qid)?;
        if !conf.enable {
            debug!(dev = self.dev_id, queue = qid, "queue left disabled");
            return Ok(());
        }
        if self.queues[usize::from(qid)].is_some() {
            return Ok(());
        }

        let q = Queue::new(QueueParams {
            qid,
            dev_id: self.dev_id,
            q_sz: conf.size,
            desc_base: conf.desc_addr,
            driver_area: conf.driver_area,
            headroom: self.source.headroom(),
            buf_len: self.source.dataroom(),
            hdr_len: self.hdr_len(),
            auto_free: self.config.auto_free,
            signals: Arc::clone(&self.signals),
            hash_report: Arc::clone(&self.hash_report),
        });
        debug!(dev = self.dev_id, queue = qid, size = conf.size, "queue configured");
        self.queues[usize::from(qid)] = Some(q);

        if self.status.contains(DeviceStatus::DRIVER_OK) {
            let event = self.fetch_event_flags(qid, chans)?;
            if let Some(q) = self.queues[usize::from(qid)].as_mut() {
                q.state = QueueState::DriverReady;
            }
            if event.wants_events() {
                self.interrupt_conf();
            }
        }
        Ok(())
    }

    /// Reads the driver event-suppression record of queue `qid` and caches it on the queue.
    pub fn fetch_event_flags(
        &mut self,
        qid: u16,
        chans: &mut DmaChannels,
    ) -> Result<PackedDescEvent> {
        self.check_qid(qid)?;
        let max = self.queues.len() as u16;
        let q = self.queues[usize::from(qid)]
            .as_mut()
            .ok_or(NetDevError::InvalidQueue { qid, max })?;
        let pair = chans.pair_mut(self.config.dma_vchan)?;

        let mut raw = [0u8; EVENT_SIZE];
        let area = q.driver_area;
        copy_sync(&mut pair.dev2mem, self.config.ctrl_poll, |chan| {
            chan.enqueue_read(area, &mut raw)
        })?;
        let event: PackedDescEvent = bytemuck::pod_read_unaligned(&raw);
        q.driver_event = Some(event);
        Ok(event)
    }

    /// Wires the device → peer queues to the interrupt lines, round robin.
    fn interrupt_conf(&mut self) {
        let nb_intrs = self.signals.nb_intrs();
        if nb_intrs == 0 {
            return;
        }
        let mut line = 0;
        for q in self.queues.iter_mut().step_by(2).flatten() {
            q.cb_intr = Some(line);
            if let Some(bell) = self.signals.doorbell(q.qid) {
                bell.set_cb_notify(0);
            }
            line = (line + 1) % nb_intrs;
        }
    }

    /// Applies a status byte written by the peer.
    pub fn set_status(&mut self, status: DeviceStatus, chans: &mut DmaChannels) -> Result<()> {
        if status.is_empty() {
            return self.reset(chans);
        }
        if status.contains(DeviceStatus::DRIVER_OK) && !self.status.contains(DeviceStatus::DRIVER_OK)
        {
            self.driver_ok(chans);
        }
        self.status = status;
        self.callbacks.status(self.dev_id, status)
    }

    fn driver_ok(&mut self, chans: &mut DmaChannels) {
        for qid in 0..self.queues.len() as u16 {
            if self.queues[usize::from(qid)].is_none() {
                continue;
            }
            match self.fetch_event_flags(qid, chans) {
                Ok(event) if event.wants_events() => {
                    self.interrupt_conf();
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(dev = self.dev_id, queue = qid, %err, "event suppression fetch failed");
                }
            }
        }

        let hdr_len = self.hdr_len();
        for q in self.queues.iter_mut().flatten() {
            q.hdr_len = hdr_len;
            q.state = QueueState::DriverReady;
        }
        self.modes = ModeSelection::from_features(
            self.features,
            self.config.auto_free,
            self.source.is_external(),
        );
        info!(
            dev = self.dev_id,
            dequeue = self.modes.deq.name,
            enqueue = self.modes.enq.name,
            manage = self.modes.mgmt.name,
            "driver ready"
        );
    }

    fn reset(&mut self, chans: &mut DmaChannels) -> Result<()> {
        let res = self.callbacks.status(self.dev_id, DeviceStatus::empty());
        if let Err(err) = self.drain_pending(chans) {
            warn!(dev = self.dev_id, %err, "copies still in flight at reset");
        }
        for qid in 0..self.queues.len() as u16 {
            self.teardown(qid)?;
        }
        self.vq_pairs_set = 0;
        self.status = DeviceStatus::empty();
        self.features = 0;
        self.features_ok = false;
        self.hash_report.clear();
        self.modes =
            ModeSelection::from_features(0, self.config.auto_free, self.source.is_external());
        debug!(dev = self.dev_id, "device reset");
        res
    }

    /// Frees queue `qid`, returning every buffer its slots still hold. Returns how many.
    pub fn teardown(&mut self, qid: u16) -> Result<usize> {
        self.check_qid(qid)?;
        let Some(mut q) = self.queues[usize::from(qid)].take() else {
            return Ok(0);
        };
        q.state = QueueState::Reset;
        let released = q.release_buffers(&mut self.source);
        debug!(dev = self.dev_id, queue = qid, released, "queue torn down");
        Ok(released)
    }

    /// Waits until every copy the device staged has finished.
    pub fn drain_pending(&mut self, chans: &mut DmaChannels) -> Result<()> {
        let pair = chans.pair_mut(self.config.dma_vchan)?;
        drain(pair, self.config.ctrl_poll)
    }

    /// Fetches descriptors and completes finished work on every active queue pair.
    pub fn desc_manage(&mut self, chans: &mut DmaChannels) -> Result<()> {
        let qp_count = self.queue_count() / 2;
        if qp_count == 0 {
            return Ok(());
        }
        let pair = chans.pair_mut(self.config.dma_vchan)?;
        (self.modes.mgmt.run)(&mut self.queues, &mut self.source, pair, qp_count);
        Ok(())
    }

    /// Moves up to `max` packets the peer sent on queue `qid` into `out`.
    ///
    /// Returns 0 for queues that are not configured or do not carry packets from the peer.
    pub fn dequeue(
        &mut self,
        qid: u16,
        chans: &mut DmaChannels,
        out: &mut Vec<PktBuf>,
        max: u16,
    ) -> u16 {
        if qid % 2 == 0 {
            return 0;
        }
        let Some(Some(q)) = self.queues.get_mut(usize::from(qid)) else {
            return 0;
        };
        let Ok(pair) = chans.pair_mut(self.config.dma_vchan) else {
            return 0;
        };
        (self.modes.deq.run)(q, &mut self.source, &mut pair.dev2mem, out, max)
    }

    /// Copies packets from `pkts` to the peer on queue `qid`. Placed and dropped packets are
    /// removed from `pkts`; the rest stay for a later call. Returns the number placed.
    pub fn enqueue(&mut self, qid: u16, chans: &mut DmaChannels, pkts: &mut Vec<PktBuf>) -> u16 {
        if qid % 2 != 0 {
            return 0;
        }
        let Some(Some(q)) = self.queues.get_mut(usize::from(qid)) else {
            return 0;
        };
        let Ok(pair) = chans.pair_mut(self.config.dma_vchan) else {
            return 0;
        };
        (self.modes.enq.run)(q, &mut self.source, &mut pair.mem2dev, pkts)
    }

    /// Returns a packet obtained from [`NetDev::dequeue`] to the device's buffer source.
    pub fn release(&mut self, pkt: PktBuf) {
        self.source.put(pkt);
    }

    /// Copies `bytes` into a buffer chain drawn from the device's source, ready for
    /// [`NetDev::enqueue`]. `None` if the source ran dry.
    pub fn packet_from_bytes(&mut self, bytes: &[u8]) -> Option<PktBuf> {
        let room = usize::from(self.source.dataroom());
        let mut chunks = bytes.chunks(room);
        let mut head = self.source.get()?;
        fill(&mut head, chunks.next().unwrap_or_default());
        for chunk in chunks {
            let Some(mut seg) = self.source.get() else {
                self.source.put(head);
                return None;
            };
            fill(&mut seg, chunk);
            head.pkt_len += seg.pkt_len;
            head.nb_segs += 1;
            head.append_segment(seg);
        }
        Some(head)
    }

    pub fn queue_state(&self, qid: u16) -> QueueState {
        match self.queues.get(usize::from(qid)) {
            Some(Some(q)) => q.state(),
            _ => QueueState::Unconfigured,
        }
    }

    pub fn queue_offsets(&self, qid: u16) -> Option<QueueOffsets> {
        self.queues.get(usize::from(qid))?.as_ref().map(Queue::offsets)
    }

    pub fn queue_stats(&self, qid: u16) -> Option<QueueStats> {
        self.queues.get(usize::from(qid))?.as_ref().map(Queue::stats)
    }

    pub fn queue(&self, qid: u16) -> Option<&Queue> {
        self.queues.get(usize::from(qid))?.as_ref()
    }

    /// Updates the link state and tells the peer its config space changed.
    pub fn link_status_update(&mut self, link: LinkInfo) -> Result<()> {
        let Some(line) = self.signals.intr(0) else {
            return Err(NetDevError::NotSupported);
        };
        self.link = link;
        self.signals.set_isr(ISR_CONFIG_CHANGE);
        line.raise(INTR_RAISE);
        debug!(dev = self.dev_id, up = link.up, speed = link.speed_mbps, "link state changed");
        Ok(())
    }

    /// Runs one control command the peer sent and writes the ack byte to `ack_addr`.
    pub fn process_ctrl(
        &mut self,
        chans: &mut DmaChannels,
        cmd: &[u8],
        ack_addr: u64,
    ) -> Result<CtrlAck> {
        let ack = match CtrlCommand::parse(cmd) {
            Ok(cmd) => self.ctrl(&cmd),
            Err(err) => {
                warn!(dev = self.dev_id, %err, "control command rejected");
                CtrlAck::Err
            }
        };
        let pair = chans.pair_mut(self.config.dma_vchan)?;
        let byte = [ack as u8];
        copy_sync(&mut pair.mem2dev, self.config.ctrl_poll, |chan| {
            chan.enqueue_write(&byte, ack_addr)
        })?;
        Ok(ack)
    }

    /// Dispatches a parsed control command to the callbacks.
    pub fn ctrl(&mut self, cmd: &CtrlCommand) -> CtrlAck {
        let dev_id = self.dev_id;
        let res = match cmd {
            CtrlCommand::Promisc(on) => self.callbacks.promisc(dev_id, *on),
            CtrlCommand::AllMulti(on) => self.callbacks.allmulti(dev_id, *on),
            CtrlCommand::MacAddrSet(mac) => self.callbacks.mac_set(dev_id, *mac).map(|()| {
                self.config.mac = *mac;
            }),
            CtrlCommand::MacTableSet { unicast, multicast } => self
                .callbacks
                .mac_add(dev_id, unicast, MacFilterKind::Unicast)
                .and_then(|()| match multicast {
                    Some(table) => self.callbacks.mac_add(dev_id, table, MacFilterKind::Multicast),
                    None => Ok(()),
                }),
            CtrlCommand::VlanAdd(tci) => self.callbacks.vlan_add(dev_id, *tci),
            CtrlCommand::VlanDel(tci) => self.callbacks.vlan_del(dev_id, *tci),
            CtrlCommand::VqPairsSet(pairs) => self.set_vq_pairs(*pairs),
            CtrlCommand::RssConfig(rss) => self.rss_config(rss),
            CtrlCommand::Unsupported { class, command } => {
                warn!(dev = dev_id, class, command, "unsupported control command");
                Err(NetDevError::NotSupported)
            }
        };
        if let Err(err) = &res {
            debug!(dev = dev_id, ?cmd, %err, "control command failed");
        }
        CtrlAck::from(&res)
    }

    fn set_vq_pairs(&mut self, pairs: u16) -> Result<()> {
        if pairs == 0 || pairs > self.config.max_queue_pairs {
            return Err(NetDevError::InvalidConfig("queue pair count out of range"));
        }
        self.callbacks.mq_configure(self.dev_id, false)?;
        self.vq_pairs_set = pairs;
        self.callbacks.mq_configure(self.dev_id, true)
    }

    fn rss_config(&mut self, rss: &RssConfig) -> Result<()> {
        if rss.max_tx_vq == 0 || rss.max_tx_vq > self.config.max_queue_pairs {
            return Err(NetDevError::InvalidConfig("queue pair count out of range"));
        }
        self.callbacks.rss(self.dev_id, None)?;
        self.vq_pairs_set = rss.max_tx_vq;
        self.callbacks.rss(self.dev_id, Some(rss))?;
        self.hash_report.configure(rss.hash_types);
        Ok(())
    }
}

fn fill(buf: &mut PktBuf, bytes: &[u8]) {
    let len = bytes.len() as u16;
    buf.room_mut(len).copy_from_slice(bytes);
    buf.data_len = len;
    buf.pkt_len = u32::from(len);
}

fn offered_features(config: &NetDevConfig) -> u64 {
    let mut offered = [
        VIRTIO_NET_F_CTRL_VQ,
        VIRTIO_NET_F_MQ,
        VIRTIO_NET_F_CTRL_RX,
        VIRTIO_NET_F_STATUS,
        VIRTIO_NET_F_MAC,
        VIRTIO_NET_F_MRG_RXBUF,
        VIRTIO_NET_F_SPEED_DUPLEX,
        VIRTIO_NET_F_CTRL_MAC_ADDR,
        VIRTIO_NET_F_CTRL_VLAN,
        VIRTIO_F_VERSION_1,
        VIRTIO_F_RING_PACKED,
        VIRTIO_F_IN_ORDER,
    ]
    .into_iter()
    .fold(0, |acc, feature| acc | bit(feature));

    if config.reta_size != 0 {
        offered |= bit(VIRTIO_NET_F_RSS) | bit(VIRTIO_NET_F_HASH_REPORT);
    }
    if config.mtu != 0 {
        offered |= bit(VIRTIO_NET_F_MTU);
    }
    if config.csum_offload {
        offered |= bit(VIRTIO_NET_F_CSUM)
            | bit(VIRTIO_NET_F_GUEST_CSUM)
            | bit(VIRTIO_NET_F_HOST_TSO4)
            | bit(VIRTIO_NET_F_HOST_TSO6)
            | bit(VIRTIO_NET_F_GUEST_HDRLEN);
    }
    offered
}

impl core::fmt::Debug for NetDev {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetDev")
            .field("dev_id", &self.dev_id)
            .field("status", &self.status)
            .field("features", &format_args!("{:#018x}", self.features))
            .field("vq_pairs_set", &self.vq_pairs_set)
            .field("modes", &self.modes)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use vnet_buf::PktPool;
    use vnet_wire::features::has;

    use super::*;

    fn device(config: NetDevConfig) -> NetDev {
        let pool = PktPool::new(64, 128, 2048);
        NetDev::new(7, config, BufferSource::Pool(Box::new(pool)), 1).unwrap()
    }

    #[test]
    fn offered_features_follow_config() {
        let dev = device(NetDevConfig::default());
        let f = dev.device_features();
        assert!(has(f, VIRTIO_F_RING_PACKED));
        assert!(has(f, VIRTIO_NET_F_CSUM));
        assert!(has(f, VIRTIO_NET_F_MTU));
        assert!(!has(f, VIRTIO_NET_F_RSS));

        let dev = device(NetDevConfig {
            csum_offload: false,
            mtu: 0,
            reta_size: 128,
            ..Default::default()
        });
        let f = dev.device_features();
        assert!(!has(f, VIRTIO_NET_F_HOST_TSO4));
        assert!(!has(f, VIRTIO_NET_F_MTU));
        assert!(has(f, VIRTIO_NET_F_HASH_REPORT));
        assert_eq!(dev.config_space().supported_hash_types, SUPPORTED_HASH_TYPES);
    }

    #[test]
    fn negotiation_rejects_unoffered_bits() {
        let mut dev = device(NetDevConfig::default());
        assert_eq!(dev.hdr_len(), 0);
        let err = dev.negotiate(bit(VIRTIO_NET_F_RSS)).unwrap_err();
        assert!(matches!(err, NetDevError::InvalidFeatures { .. }));

        dev.negotiate(bit(VIRTIO_F_VERSION_1) | bit(VIRTIO_F_RING_PACKED))
            .unwrap();
        assert_eq!(dev.hdr_len(), 12);
        // Not visible until the driver is up.
        assert_eq!(dev.feature_bits(), 0);
        assert_eq!(dev.queue_count(), 0);
    }

    #[test]
    fn packet_from_bytes_chains_segments() {
        let pool = PktPool::new(4, 64, 100);
        let mut dev = NetDev::new(
            0,
            NetDevConfig::default(),
            BufferSource::Pool(Box::new(pool)),
            0,
        )
        .unwrap();
        let bytes: Vec<u8> = (0..250u8).collect();
        let pkt = dev.packet_from_bytes(&bytes).unwrap();
        assert_eq!(pkt.nb_segs, 3);
        assert_eq!(pkt.pkt_len, 250);
        assert_eq!(pkt.to_vec(), bytes);
        dev.release(pkt);

        // Five segments needed, four buffers exist.
        assert!(dev.packet_from_bytes(&[0; 450]).is_none());
        assert!(dev.packet_from_bytes(&[0; 400]).is_some());
    }

    #[test]
    fn link_update_needs_an_interrupt_line() {
        let pool = PktPool::new(4, 64, 100);
        let mut dev = NetDev::new(
            0,
            NetDevConfig::default(),
            BufferSource::Pool(Box::new(pool)),
            0,
        )
        .unwrap();
        let down = LinkInfo {
            up: false,
            ..Default::default()
        };
        assert!(matches!(
            dev.link_status_update(down),
            Err(NetDevError::NotSupported)
        ));

        let mut dev = device(NetDevConfig::default());
        dev.link_status_update(down).unwrap();
        assert_eq!(dev.config_space().status, 0);
        assert_eq!(dev.signals().take_isr(), ISR_CONFIG_CHANGE);
        assert_eq!(dev.signals().intr(0).unwrap().take(), INTR_RAISE);
    }
}
