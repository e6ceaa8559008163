use std::collections::BTreeMap;

use crate::{NetDev, NetDevError, Result};

/// Handle a registered device is addressed by. Equal to the device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevHandle(u16);

impl DevHandle {
    pub fn id(self) -> u16 {
        self.0
    }
}

/// Owns every device of a process, keyed by handle.
#[derive(Debug, Default)]
pub struct NetDevRegistry {
    devs: BTreeMap<u16, NetDev>,
}

impl NetDevRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dev: NetDev) -> Result<DevHandle> {
        let id = dev.dev_id();
        if self.devs.contains_key(&id) {
            return Err(NetDevError::DuplicateDevice(id));
        }
        self.devs.insert(id, dev);
        Ok(DevHandle(id))
    }

    pub fn handle(&self, id: u16) -> Option<DevHandle> {
        self.devs.contains_key(&id).then_some(DevHandle(id))
    }

    pub fn get(&self, handle: DevHandle) -> Result<&NetDev> {
        self.devs
            .get(&handle.0)
            .ok_or(NetDevError::UnknownDevice(handle.0))
    }

    pub fn get_mut(&mut self, handle: DevHandle) -> Result<&mut NetDev> {
        self.devs
            .get_mut(&handle.0)
            .ok_or(NetDevError::UnknownDevice(handle.0))
    }

    pub fn remove(&mut self, handle: DevHandle) -> Result<NetDev> {
        self.devs
            .remove(&handle.0)
            .ok_or(NetDevError::UnknownDevice(handle.0))
    }

    pub fn len(&self) -> usize {
        self.devs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devs.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (DevHandle, &mut NetDev)> {
        self.devs.iter_mut().map(|(id, dev)| (DevHandle(*id), dev))
    }
}

#[cfg(test)]
mod tests {
    use vnet_buf::{BufferSource, PktPool};

    use super::*;
    use crate::NetDevConfig;

    fn device(id: u16) -> NetDev {
        let pool = PktPool::new(8, 128, 2048);
        NetDev::new(id, NetDevConfig::default(), BufferSource::Pool(Box::new(pool)), 0).unwrap()
    }

    #[test]
    fn handles_follow_device_ids() {
        let mut reg = NetDevRegistry::new();
        let a = reg.insert(device(3)).unwrap();
        let b = reg.insert(device(9)).unwrap();
        assert_eq!((a.id(), b.id()), (3, 9));
        assert_eq!(reg.handle(9), Some(b));
        assert_eq!(reg.handle(4), None);
        assert_eq!(reg.get(a).unwrap().dev_id(), 3);

        let ids: Vec<u16> = reg.iter_mut().map(|(h, _)| h.id()).collect();
        assert_eq!(ids, vec![3, 9]);
    }

    #[test]
    fn duplicate_and_stale_handles_are_rejected() {
        let mut reg = NetDevRegistry::new();
        let h = reg.insert(device(1)).unwrap();
        assert!(matches!(
            reg.insert(device(1)),
            Err(NetDevError::DuplicateDevice(1))
        ));
        assert_eq!(reg.len(), 1);

        reg.remove(h).unwrap();
        assert!(reg.is_empty());
        assert!(matches!(reg.get_mut(h), Err(NetDevError::UnknownDevice(1))));
        assert!(matches!(reg.remove(h), Err(NetDevError::UnknownDevice(1))));
    }
}
