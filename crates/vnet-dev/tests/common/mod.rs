#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use vnet_buf::{BufferSource, PktBuf, PktPool};
use vnet_dev::{
    DeviceStatus, DmaChannels, NetDev, NetDevConfig, PeerSignals, QueueConf, VchanPair,
};
use vnet_dma::{DenseMemory, RemoteMemory, SoftCopyEngine, SoftEngineControl, VirtualChannel};
use vnet_wire::features::{bit, VIRTIO_F_RING_PACKED, VIRTIO_F_VERSION_1};
use vnet_wire::offset;
use vnet_wire::{DescFlags, PackedDesc, VirtioNetHdr, DESC_SIZE};

pub const MEM_SIZE: u64 = 0x40_0000;
pub const RX_RING: u64 = 0x1_0000;
pub const TX_RING: u64 = 0x2_0000;
pub const RX_EVENT: u64 = 0x0800;
pub const TX_EVENT: u64 = 0x0900;
/// Peer transmit buffers, one 4 KiB page per slot.
pub const TX_BUFS: u64 = 0x10_0000;
/// Peer receive buffers, one 4 KiB page per slot.
pub const RX_BUFS: u64 = 0x20_0000;
pub const PAGE: u64 = 0x1000;

pub const HEADROOM: u16 = 128;
pub const DATAROOM: u16 = 2048;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn base_features() -> u64 {
    bit(VIRTIO_F_VERSION_1) | bit(VIRTIO_F_RING_PACKED)
}

/// Peer-side view of one packed ring.
#[derive(Debug)]
pub struct PeerRing {
    pub qid: u16,
    pub base: u64,
    pub size: u16,
    /// Next offset the peer writes a descriptor at.
    pub next_off: u16,
    /// Next offset the peer expects a used element at.
    pub used_off: u16,
}

impl PeerRing {
    fn new(qid: u16, base: u64, size: u16) -> Self {
        Self {
            qid,
            base,
            size,
            next_off: offset::INITIAL_OFF,
            used_off: offset::INITIAL_OFF,
        }
    }

    pub fn slot_addr(&self, off: u16) -> u64 {
        self.base + u64::from(offset::to_index(off, self.size)) * DESC_SIZE as u64
    }
}

/// A device wired to a simulated peer through software copy engines over one memory.
pub struct Rig {
    pub mem: Arc<Mutex<DenseMemory>>,
    pub pool: Arc<Mutex<PktPool>>,
    pub dev: NetDev,
    pub chans: DmaChannels,
    pub signals: Arc<PeerSignals>,
    pub rx: PeerRing,
    pub tx: PeerRing,
    pub dev2mem: Arc<SoftEngineControl>,
    pub mem2dev: Arc<SoftEngineControl>,
}

pub struct RigOptions {
    pub config: NetDevConfig,
    pub features: u64,
    pub q_sz: u16,
    pub pool_size: usize,
    pub nb_intrs: u16,
    pub driver_ok: bool,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            config: NetDevConfig::default(),
            features: base_features(),
            q_sz: 256,
            pool_size: 2048,
            nb_intrs: 1,
            driver_ok: true,
        }
    }
}

impl Rig {
    pub fn new(opts: RigOptions) -> Self {
        init_tracing();
        let mem = Arc::new(Mutex::new(DenseMemory::new(MEM_SIZE).unwrap()));

        let d2m = SoftCopyEngine::new(Arc::clone(&mem));
        let m2d = SoftCopyEngine::new(Arc::clone(&mem));
        let (dev2mem, mem2dev) = (d2m.control(), m2d.control());
        let mut chans = DmaChannels::new();
        chans.insert(
            opts.config.dma_vchan,
            VchanPair::new(
                VirtualChannel::new(opts.config.dma_vchan, Box::new(d2m)),
                VirtualChannel::new(opts.config.dma_vchan, Box::new(m2d)),
            ),
        );

        let pool = PktPool::shared(opts.pool_size, HEADROOM, DATAROOM);
        let source = BufferSource::Pool(Box::new(Arc::clone(&pool)));
        let mut dev = NetDev::new(0, opts.config, source, opts.nb_intrs).unwrap();
        dev.negotiate(opts.features).unwrap();
        dev.configure(0, QueueConf::new(opts.q_sz, RX_RING, RX_EVENT), &mut chans)
            .unwrap();
        dev.configure(1, QueueConf::new(opts.q_sz, TX_RING, TX_EVENT), &mut chans)
            .unwrap();
        let signals = Arc::clone(dev.signals());

        let mut rig = Self {
            mem,
            pool,
            dev,
            chans,
            signals,
            rx: PeerRing::new(0, RX_RING, opts.q_sz),
            tx: PeerRing::new(1, TX_RING, opts.q_sz),
            dev2mem,
            mem2dev,
        };
        if opts.driver_ok {
            rig.driver_ok();
        }
        rig
    }

    pub fn driver_ok(&mut self) {
        let status = DeviceStatus::ACKNOWLEDGE
            | DeviceStatus::DRIVER
            | DeviceStatus::FEATURES_OK
            | DeviceStatus::DRIVER_OK;
        self.dev.set_status(status, &mut self.chans).unwrap();
    }

    pub fn write(&self, addr: u64, bytes: &[u8]) {
        self.mem.lock().unwrap().write_from(addr, bytes).unwrap();
    }

    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        self.mem.lock().unwrap().read_into(addr, &mut out).unwrap();
        out
    }

    pub fn read_desc(&self, ring: &PeerRing, off: u16) -> PackedDesc {
        bytemuck::pod_read_unaligned(&self.read(ring.slot_addr(off), DESC_SIZE))
    }

    pub fn write_desc(&self, ring: &PeerRing, off: u16, desc: PackedDesc) {
        self.write(ring.slot_addr(off), bytemuck::bytes_of(&desc));
    }

    /// Writes `hdr` followed by `payload` into the transmit buffer of the next slot and posts one
    /// descriptor for it, chained to the following one when `next` is set. Not yet published.
    pub fn post_tx(&mut self, hdr: &VirtioNetHdr, payload: &[u8], next: bool) -> u16 {
        let mut bytes = vec![0u8; VirtioNetHdr::LEN];
        hdr.write_le(&mut bytes);
        bytes.extend_from_slice(payload);
        self.post_tx_raw(&bytes, next)
    }

    /// Posts a transmit descriptor over `bytes` as they are, header included or not.
    pub fn post_tx_raw(&mut self, bytes: &[u8], next: bool) -> u16 {
        let off = self.tx.next_off;
        let idx = u64::from(offset::to_index(off, self.tx.size));
        let addr = TX_BUFS + idx * PAGE;
        self.write(addr, bytes);
        let extra = if next { DescFlags::NEXT } else { DescFlags::empty() };
        let desc = PackedDesc::available(addr, bytes.len() as u32, idx as u16, extra, offset::wrap(off));
        self.write_desc(&self.tx, off, desc);
        self.tx.next_off = offset::add(off, 1, self.tx.size);
        off
    }

    /// Posts `n` receive descriptors of `len` bytes each. Not yet published.
    pub fn post_rx(&mut self, n: u16, len: u32) {
        for _ in 0..n {
            let off = self.rx.next_off;
            let idx = u64::from(offset::to_index(off, self.rx.size));
            let desc = PackedDesc::available(
                RX_BUFS + idx * PAGE,
                len,
                idx as u16,
                DescFlags::WRITE,
                offset::wrap(off),
            );
            self.write_desc(&self.rx, off, desc);
            self.rx.next_off = offset::add(off, 1, self.rx.size);
        }
    }

    pub fn publish_tx(&self) {
        self.signals
            .doorbell(1)
            .unwrap()
            .publish(1, self.tx.next_off);
    }

    pub fn publish_rx(&self) {
        self.signals
            .doorbell(0)
            .unwrap()
            .publish(0, self.rx.next_off);
    }

    /// Submits everything staged and lets the engines finish it.
    pub fn settle(&mut self) {
        self.chans.flush_submit();
        self.chans.poll_all(true);
    }

    pub fn manage(&mut self) {
        self.dev.desc_manage(&mut self.chans).unwrap();
        self.chans.flush_submit();
    }

    /// Runs management and dequeue rounds until `want` packets came out or `rounds` ran.
    pub fn pull(&mut self, want: usize, rounds: usize) -> Vec<PktBuf> {
        let mut out = Vec::new();
        for _ in 0..rounds {
            self.manage();
            let left = (want - out.len()) as u16;
            self.dev.dequeue(1, &mut self.chans, &mut out, left);
            self.chans.flush_submit();
            if out.len() >= want {
                break;
            }
        }
        out
    }

    pub fn release(&mut self, pkts: Vec<PktBuf>) {
        for pkt in pkts {
            self.dev.release(pkt);
        }
    }

    pub fn pool_in_use(&self) -> usize {
        self.pool.lock().unwrap().in_use()
    }

    /// Whether the descriptor at `off` is marked used for the lap `off` is on.
    pub fn is_used(&self, ring: &PeerRing, off: u16) -> bool {
        let desc = self.read_desc(ring, off);
        let wrap = offset::wrap(off);
        desc.is_avail() == wrap && desc.is_used() == wrap
    }

    /// Peer side: takes back every transmit descriptor the device completed and returns how
    /// many. A used element covers every slot up to the one whose buffer id it carries, so this
    /// works whether runs were collapsed or written back one by one.
    pub fn reclaim_tx(&mut self) -> u16 {
        let size = self.tx.size;
        let mut n = 0;
        while self.tx.used_off != self.tx.next_off && self.is_used(&self.tx, self.tx.used_off) {
            // Buffer ids are slot indexes.
            let id = self.read_desc(&self.tx, self.tx.used_off).id();
            let idx = offset::to_index(self.tx.used_off, size);
            let run = (id.wrapping_sub(idx) & (size - 1)) + 1;
            self.tx.used_off = offset::add(self.tx.used_off, run, size);
            n += run;
        }
        n
    }
}

pub fn udp_hdr(csum_start: u16) -> VirtioNetHdr {
    VirtioNetHdr {
        csum_start,
        csum_offset: vnet_wire::hdr::CSUM_OFFSET_UDP,
        ..VirtioNetHdr::default()
    }
}

pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
