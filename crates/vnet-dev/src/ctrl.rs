//! Control-queue commands and the application callbacks they are dispatched to.

use crate::{NetDevError, Result};

pub const VIRTIO_NET_CTRL_RX: u8 = 0;
pub const VIRTIO_NET_CTRL_RX_PROMISC: u8 = 0;
pub const VIRTIO_NET_CTRL_RX_ALLMULTI: u8 = 1;

pub const VIRTIO_NET_CTRL_MAC: u8 = 1;
pub const VIRTIO_NET_CTRL_MAC_TABLE_SET: u8 = 0;
pub const VIRTIO_NET_CTRL_MAC_ADDR_SET: u8 = 1;

pub const VIRTIO_NET_CTRL_VLAN: u8 = 2;
pub const VIRTIO_NET_CTRL_VLAN_ADD: u8 = 0;
pub const VIRTIO_NET_CTRL_VLAN_DEL: u8 = 1;

pub const VIRTIO_NET_CTRL_MQ: u8 = 4;
pub const VIRTIO_NET_CTRL_MQ_VQ_PAIRS_SET: u8 = 0;
pub const VIRTIO_NET_CTRL_MQ_RSS_CONFIG: u8 = 1;

pub type MacAddr = [u8; 6];

/// Status byte written back to the peer for every control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CtrlAck {
    Ok = 0,
    Err = 1,
}

impl<T> From<&Result<T>> for CtrlAck {
    fn from(res: &Result<T>) -> Self {
        match res {
            Ok(_) => Self::Ok,
            Err(_) => Self::Err,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacFilterKind {
    Unicast,
    Multicast,
}

/// Receive-side scaling request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssConfig {
    pub hash_types: u32,
    pub unclassified_queue: u16,
    pub indirection_table: Vec<u16>,
    pub max_tx_vq: u16,
    pub hash_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtrlCommand {
    Promisc(bool),
    AllMulti(bool),
    MacAddrSet(MacAddr),
    MacTableSet {
        unicast: Vec<MacAddr>,
        /// Absent when the command carried no multicast table.
        multicast: Option<Vec<MacAddr>>,
    },
    VlanAdd(u16),
    VlanDel(u16),
    VqPairsSet(u16),
    RssConfig(RssConfig),
    Unsupported { class: u8, command: u8 },
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(NetDevError::MalformedCommand(what));
        }
        let (head, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(head)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn mac(&mut self, what: &'static str) -> Result<MacAddr> {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(self.take(6, what)?);
        Ok(mac)
    }

    fn mac_table(&mut self, what: &'static str) -> Result<Vec<MacAddr>> {
        let entries = self.u32(what)? as usize;
        if self.bytes.len() / 6 < entries {
            return Err(NetDevError::MalformedCommand(what));
        }
        (0..entries).map(|_| self.mac(what)).collect()
    }
}

impl CtrlCommand {
    /// Parses `class`, `command` and the command payload, all little-endian.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes };
        let class = r.u8("missing class")?;
        let command = r.u8("missing command")?;
        let cmd = match (class, command) {
            (VIRTIO_NET_CTRL_RX, VIRTIO_NET_CTRL_RX_PROMISC) => {
                Self::Promisc(r.u8("promisc flag")? != 0)
            }
            (VIRTIO_NET_CTRL_RX, VIRTIO_NET_CTRL_RX_ALLMULTI) => {
                Self::AllMulti(r.u8("allmulti flag")? != 0)
            }
            (VIRTIO_NET_CTRL_MAC, VIRTIO_NET_CTRL_MAC_ADDR_SET) => {
                Self::MacAddrSet(r.mac("mac address")?)
            }
            (VIRTIO_NET_CTRL_MAC, VIRTIO_NET_CTRL_MAC_TABLE_SET) => {
                let unicast = r.mac_table("unicast mac table")?;
                let multicast = if r.bytes.len() >= 4 {
                    Some(r.mac_table("multicast mac table")?)
                } else {
                    None
                };
                Self::MacTableSet { unicast, multicast }
            }
            (VIRTIO_NET_CTRL_VLAN, VIRTIO_NET_CTRL_VLAN_ADD) => Self::VlanAdd(r.u16("vlan tci")?),
            (VIRTIO_NET_CTRL_VLAN, VIRTIO_NET_CTRL_VLAN_DEL) => Self::VlanDel(r.u16("vlan tci")?),
            (VIRTIO_NET_CTRL_MQ, VIRTIO_NET_CTRL_MQ_VQ_PAIRS_SET) => {
                Self::VqPairsSet(r.u16("virtqueue pairs")?)
            }
            (VIRTIO_NET_CTRL_MQ, VIRTIO_NET_CTRL_MQ_RSS_CONFIG) => {
                let hash_types = r.u32("rss hash types")?;
                let mask = r.u16("rss indirection mask")?;
                let unclassified_queue = r.u16("rss unclassified queue")?;
                let indirection_table = (0..=usize::from(mask))
                    .map(|_| r.u16("rss indirection table"))
                    .collect::<Result<Vec<_>>>()?;
                let max_tx_vq = r.u16("rss max tx vq")?;
                let key_len = r.u8("rss key length")?;
                let hash_key = r.take(usize::from(key_len), "rss key")?.to_vec();
                Self::RssConfig(RssConfig {
                    hash_types,
                    unclassified_queue,
                    indirection_table,
                    max_tx_vq,
                    hash_key,
                })
            }
            (class, command) => Self::Unsupported { class, command },
        };
        Ok(cmd)
    }
}

/// Application hooks a device forwards status changes and control commands to.
///
/// Every hook defaults to [`NetDevError::NotSupported`], which the peer sees as
/// [`CtrlAck::Err`]. `status` defaults to accepting the change.
pub trait NetDevCallbacks {
    fn status(&mut self, _dev_id: u16, _status: crate::DeviceStatus) -> Result<()> {
        Ok(())
    }

    /// `None` clears the current RSS setup before a new one is applied.
    fn rss(&mut self, _dev_id: u16, _rss: Option<&RssConfig>) -> Result<()> {
        Err(NetDevError::NotSupported)
    }

    fn promisc(&mut self, _dev_id: u16, _enable: bool) -> Result<()> {
        Err(NetDevError::NotSupported)
    }

    fn allmulti(&mut self, _dev_id: u16, _enable: bool) -> Result<()> {
        Err(NetDevError::NotSupported)
    }

    fn mac_set(&mut self, _dev_id: u16, _mac: MacAddr) -> Result<()> {
        Err(NetDevError::NotSupported)
    }

    fn mac_add(&mut self, _dev_id: u16, _macs: &[MacAddr], _kind: MacFilterKind) -> Result<()> {
        Err(NetDevError::NotSupported)
    }

    fn vlan_add(&mut self, _dev_id: u16, _tci: u16) -> Result<()> {
        Err(NetDevError::NotSupported)
    }

    fn vlan_del(&mut self, _dev_id: u16, _tci: u16) -> Result<()> {
        Err(NetDevError::NotSupported)
    }

    /// Called with `false` to tear down the queue map, then `true` to rebuild it.
    fn mq_configure(&mut self, _dev_id: u16, _enable: bool) -> Result<()> {
        Err(NetDevError::NotSupported)
    }
}

/// Callbacks that support nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl NetDevCallbacks for NoCallbacks {}

impl<T: NetDevCallbacks + ?Sized> NetDevCallbacks for Box<T> {
    fn status(&mut self, dev_id: u16, status: crate::DeviceStatus) -> Result<()> {
        <T as NetDevCallbacks>::status(&mut **self, dev_id, status)
    }

    fn rss(&mut self, dev_id: u16, rss: Option<&RssConfig>) -> Result<()> {
        <T as NetDevCallbacks>::rss(&mut **self, dev_id, rss)
    }

    fn promisc(&mut self, dev_id: u16, enable: bool) -> Result<()> {
        <T as NetDevCallbacks>::promisc(&mut **self, dev_id, enable)
    }

    fn allmulti(&mut self, dev_id: u16, enable: bool) -> Result<()> {
        <T as NetDevCallbacks>::allmulti(&mut **self, dev_id, enable)
    }

    fn mac_set(&mut self, dev_id: u16, mac: MacAddr) -> Result<()> {
        <T as NetDevCallbacks>::mac_set(&mut **self, dev_id, mac)
    }

    fn mac_add(&mut self, dev_id: u16, macs: &[MacAddr], kind: MacFilterKind) -> Result<()> {
        <T as NetDevCallbacks>::mac_add(&mut **self, dev_id, macs, kind)
    }

    fn vlan_add(&mut self, dev_id: u16, tci: u16) -> Result<()> {
        <T as NetDevCallbacks>::vlan_add(&mut **self, dev_id, tci)
    }

    fn vlan_del(&mut self, dev_id: u16, tci: u16) -> Result<()> {
        <T as NetDevCallbacks>::vlan_del(&mut **self, dev_id, tci)
    }

    fn mq_configure(&mut self, dev_id: u16, enable: bool) -> Result<()> {
        <T as NetDevCallbacks>::mq_configure(&mut **self, dev_id, enable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mac_table_with_and_without_multicast() {
        let mut bytes = vec![VIRTIO_NET_CTRL_MAC, VIRTIO_NET_CTRL_MAC_TABLE_SET];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&[2, 0, 0, 0, 0, 1]);
        let cmd = CtrlCommand::parse(&bytes).unwrap();
        assert_eq!(
            cmd,
            CtrlCommand::MacTableSet {
                unicast: vec![[2, 0, 0, 0, 0, 1]],
                multicast: None
            }
        );

        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 0, 0x5e, 0, 0, 1, 1, 0, 0x5e, 0, 0, 2]);
        let CtrlCommand::MacTableSet { multicast, .. } = CtrlCommand::parse(&bytes).unwrap() else {
            panic!("wrong command");
        };
        assert_eq!(multicast.unwrap().len(), 2);
    }

    #[test]
    fn parses_rss_config() {
        let mut bytes = vec![VIRTIO_NET_CTRL_MQ, VIRTIO_NET_CTRL_MQ_RSS_CONFIG];
        bytes.extend_from_slice(&0x12u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.push(3);
        bytes.extend_from_slice(&[0xaa, 0xbb, 0xcc]);

        let CtrlCommand::RssConfig(rss) = CtrlCommand::parse(&bytes).unwrap() else {
            panic!("wrong command");
        };
        assert_eq!(rss.hash_types, 0x12);
        assert_eq!(rss.indirection_table, vec![0, 1]);
        assert_eq!(rss.max_tx_vq, 4);
        assert_eq!(rss.hash_key, vec![0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn truncated_and_unknown_commands() {
        assert!(matches!(
            CtrlCommand::parse(&[VIRTIO_NET_CTRL_VLAN, VIRTIO_NET_CTRL_VLAN_ADD, 1]),
            Err(NetDevError::MalformedCommand("vlan tci"))
        ));
        assert_eq!(
            CtrlCommand::parse(&[3, 0]).unwrap(),
            CtrlCommand::Unsupported {
                class: 3,
                command: 0
            }
        );
    }
}
