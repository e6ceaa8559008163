//! Host side of the device: where frames the peer sends go, and where frames for the peer come
//! from.

/// Bridges raw Ethernet frames between a [`crate::NetDev`] and the host network.
pub trait PacketBackend {
    /// Takes a peer → host frame.
    fn transmit(&mut self, frame: Vec<u8>);

    /// Next host → peer frame, if any.
    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        None
    }
}

impl<T: PacketBackend + ?Sized> PacketBackend for Box<T> {
    fn transmit(&mut self, frame: Vec<u8>) {
        <T as PacketBackend>::transmit(&mut **self, frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        <T as PacketBackend>::poll_receive(&mut **self)
    }
}

impl<B: PacketBackend> PacketBackend for Option<B> {
    fn transmit(&mut self, frame: Vec<u8>) {
        if let Some(backend) = self.as_mut() {
            backend.transmit(frame);
        }
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.as_mut().and_then(|backend| backend.poll_receive())
    }
}

impl<T: PacketBackend + ?Sized> PacketBackend for std::sync::Arc<std::sync::Mutex<T>> {
    fn transmit(&mut self, frame: Vec<u8>) {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .transmit(frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .poll_receive()
    }
}

/// Loops every transmitted frame straight back as a received one.
#[derive(Debug, Default)]
pub struct LoopbackBackend {
    frames: std::collections::VecDeque<Vec<u8>>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames transmitted and not yet received.
    pub fn pending(&self) -> usize {
        self.frames.len()
    }
}

impl PacketBackend for LoopbackBackend {
    fn transmit(&mut self, frame: Vec<u8>) {
        self.frames.push_back(frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }
}
