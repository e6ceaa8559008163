mod common;

use std::sync::{Arc, Mutex};

use common::*;
use vnet_dev::ctrl::{
    VIRTIO_NET_CTRL_MAC, VIRTIO_NET_CTRL_MAC_ADDR_SET, VIRTIO_NET_CTRL_MAC_TABLE_SET,
    VIRTIO_NET_CTRL_MQ, VIRTIO_NET_CTRL_MQ_VQ_PAIRS_SET, VIRTIO_NET_CTRL_RX,
    VIRTIO_NET_CTRL_RX_PROMISC,
};
use vnet_dev::{
    CtrlAck, CtrlCommand, MacAddr, MacFilterKind, NetDevCallbacks, NetDevConfig,
};

const ACK: u64 = 0x3000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Promisc(bool),
    MacSet(MacAddr),
    MacAdd(Vec<MacAddr>, MacFilterKind),
    Mq(bool),
}

#[derive(Debug, Default, Clone)]
struct Recorder(Arc<Mutex<Vec<Call>>>);

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, call: Call) -> vnet_dev::Result<()> {
        self.0.lock().unwrap().push(call);
        Ok(())
    }
}

impl NetDevCallbacks for Recorder {
    fn promisc(&mut self, _dev_id: u16, enable: bool) -> vnet_dev::Result<()> {
        self.push(Call::Promisc(enable))
    }

    fn mac_set(&mut self, _dev_id: u16, mac: MacAddr) -> vnet_dev::Result<()> {
        self.push(Call::MacSet(mac))
    }

    fn mac_add(
        &mut self,
        _dev_id: u16,
        macs: &[MacAddr],
        kind: MacFilterKind,
    ) -> vnet_dev::Result<()> {
        self.push(Call::MacAdd(macs.to_vec(), kind))
    }

    fn mq_configure(&mut self, _dev_id: u16, enable: bool) -> vnet_dev::Result<()> {
        self.push(Call::Mq(enable))
    }
}

fn rig_with(config: NetDevConfig) -> (Rig, Recorder) {
    let mut rig = Rig::new(RigOptions {
        config,
        ..Default::default()
    });
    let rec = Recorder::default();
    rig.dev.set_callbacks(Box::new(rec.clone()));
    rig.write(ACK, &[0xff]);
    (rig, rec)
}

fn run(rig: &mut Rig, cmd: &[u8]) -> CtrlAck {
    rig.dev.process_ctrl(&mut rig.chans, cmd, ACK).unwrap()
}

#[test]
fn ack_byte_is_written_to_the_peer() {
    let (mut rig, rec) = rig_with(NetDevConfig::default());
    let ack = run(&mut rig, &[VIRTIO_NET_CTRL_RX, VIRTIO_NET_CTRL_RX_PROMISC, 1]);
    assert_eq!(ack, CtrlAck::Ok);
    assert_eq!(rig.read(ACK, 1), vec![CtrlAck::Ok as u8]);
    assert_eq!(rec.calls(), vec![Call::Promisc(true)]);

    let ack = run(&mut rig, &[9, 0]);
    assert_eq!(ack, CtrlAck::Err);
    assert_eq!(rig.read(ACK, 1), vec![CtrlAck::Err as u8]);

    // Truncated payload: rejected before any callback runs.
    let ack = run(&mut rig, &[VIRTIO_NET_CTRL_MAC, VIRTIO_NET_CTRL_MAC_ADDR_SET, 1, 2]);
    assert_eq!(ack, CtrlAck::Err);
    assert_eq!(rec.calls().len(), 1);
}

#[test]
fn mac_commands() {
    let (mut rig, rec) = rig_with(NetDevConfig::default());
    let mac = [0x52, 0x54, 0, 0x12, 0x34, 0x56];
    let mut cmd = vec![VIRTIO_NET_CTRL_MAC, VIRTIO_NET_CTRL_MAC_ADDR_SET];
    cmd.extend_from_slice(&mac);
    assert_eq!(run(&mut rig, &cmd), CtrlAck::Ok);
    assert_eq!(rig.dev.config_space().mac, mac);

    let uni = [2, 0, 0, 0, 0, 7];
    let multi = [1, 0, 0x5e, 0, 0, 1];
    let mut cmd = vec![VIRTIO_NET_CTRL_MAC, VIRTIO_NET_CTRL_MAC_TABLE_SET];
    cmd.extend_from_slice(&1u32.to_le_bytes());
    cmd.extend_from_slice(&uni);
    cmd.extend_from_slice(&1u32.to_le_bytes());
    cmd.extend_from_slice(&multi);
    assert_eq!(run(&mut rig, &cmd), CtrlAck::Ok);

    assert_eq!(
        rec.calls(),
        vec![
            Call::MacSet(mac),
            Call::MacAdd(vec![uni], MacFilterKind::Unicast),
            Call::MacAdd(vec![multi], MacFilterKind::Multicast),
        ]
    );
}

#[test]
fn queue_pairs_are_range_checked() {
    let (mut rig, rec) = rig_with(NetDevConfig {
        max_queue_pairs: 2,
        ..Default::default()
    });
    assert_eq!(rig.dev.queue_count(), 2);

    let mut cmd = vec![VIRTIO_NET_CTRL_MQ, VIRTIO_NET_CTRL_MQ_VQ_PAIRS_SET];
    cmd.extend_from_slice(&2u16.to_le_bytes());
    assert_eq!(run(&mut rig, &cmd), CtrlAck::Ok);
    assert_eq!(rig.dev.vq_pairs_set(), 2);
    assert_eq!(rig.dev.queue_count(), 4);
    assert_eq!(rec.calls(), vec![Call::Mq(false), Call::Mq(true)]);

    assert_eq!(rig.dev.ctrl(&CtrlCommand::VqPairsSet(3)), CtrlAck::Err);
    assert_eq!(rig.dev.ctrl(&CtrlCommand::VqPairsSet(0)), CtrlAck::Err);
    assert_eq!(rig.dev.vq_pairs_set(), 2);
    assert_eq!(rec.calls().len(), 2);
}

#[test]
fn default_callbacks_refuse_everything() {
    let mut rig = Rig::new(RigOptions::default());
    assert_eq!(rig.dev.ctrl(&CtrlCommand::Promisc(true)), CtrlAck::Err);
    assert_eq!(rig.dev.ctrl(&CtrlCommand::VlanAdd(100)), CtrlAck::Err);
    let before = rig.dev.config_space().mac;
    assert_eq!(rig.dev.ctrl(&CtrlCommand::MacAddrSet([2; 6])), CtrlAck::Err);
    assert_eq!(rig.dev.config_space().mac, before);
}
