use std::collections::VecDeque;

use thiserror::Error;

/// Largest frame the ethernet device moves in one operation.
pub const PACKET_SIZE: usize = 1514;

// Interface mode bits, as exchanged through CONFIGURE/READCONF.
pub const MODE_NAMED: u32 = 0x1;
/// Interface wants the device to poll for incoming packets and interrupt the
/// CPU when one is waiting, instead of being read synchronously.
pub const MODE_INTERRUPT: u32 = 0x2;
pub const MODE_PROMISQ: u32 = 0x4;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("network backend failure: {0}")]
    Backend(&'static str),
}

/// Pluggable network backend behind the ethernet device.
///
/// The simulation core never touches real interfaces; embedders provide a
/// backend (a tunnel, a capture file, a test queue) satisfying this trait.
pub trait NetworkInterface {
    fn mode(&self) -> u32;
    fn set_mode(&mut self, mode: u32);

    fn mac_addr(&self) -> [u8; 6];
    fn set_mac_addr(&mut self, mac: [u8; 6]);

    /// Whether at least one received frame is waiting to be picked up.
    fn rx_pending(&mut self) -> bool;

    /// Pop the next waiting frame into `buf`. Returns the frame length, or
    /// `Ok(0)` when nothing is waiting.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;

    /// Send one frame. Returns the number of bytes accepted.
    fn send(&mut self, frame: &[u8]) -> Result<usize, NetError>;
}

/// In-memory queue backend: frames pushed by the host show up on `recv`, sent
/// frames are captured for inspection. The default backend, and the one the
/// tests drive.
#[derive(Debug)]
pub struct QueueInterface {
    mode: u32,
    mac: [u8; 6],
    rx: VecDeque<Vec<u8>>,
    tx: Vec<Vec<u8>>,
}

impl QueueInterface {
    pub fn new(mode: u32, mac: [u8; 6]) -> Self {
        Self {
            mode,
            mac,
            rx: VecDeque::new(),
            tx: Vec::new(),
        }
    }

    /// Queue a frame for the guest to receive.
    pub fn push_rx(&mut self, frame: &[u8]) {
        self.rx.push_back(frame.to_vec());
    }

    /// Drain the frames the guest has sent so far.
    pub fn take_tx(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.tx)
    }
}

impl Default for QueueInterface {
    fn default() -> Self {
        Self::new(0, [0; 6])
    }
}

/// Handle letting a test or UI keep feeding frames to an interface already
/// handed to the device.
pub type SharedQueueInterface = std::rc::Rc<std::cell::RefCell<QueueInterface>>;

impl NetworkInterface for SharedQueueInterface {
    fn mode(&self) -> u32 {
        self.borrow().mode()
    }

    fn set_mode(&mut self, mode: u32) {
        self.borrow_mut().set_mode(mode);
    }

    fn mac_addr(&self) -> [u8; 6] {
        self.borrow().mac_addr()
    }

    fn set_mac_addr(&mut self, mac: [u8; 6]) {
        self.borrow_mut().set_mac_addr(mac);
    }

    fn rx_pending(&mut self) -> bool {
        self.borrow_mut().rx_pending()
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        self.borrow_mut().recv(buf)
    }

    fn send(&mut self, frame: &[u8]) -> Result<usize, NetError> {
        self.borrow_mut().send(frame)
    }
}

impl NetworkInterface for QueueInterface {
    fn mode(&self) -> u32 {
        self.mode
    }

    fn set_mode(&mut self, mode: u32) {
        self.mode = mode;
    }

    fn mac_addr(&self) -> [u8; 6] {
        self.mac
    }

    fn set_mac_addr(&mut self, mac: [u8; 6]) {
        self.mac = mac;
    }

    fn rx_pending(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        let Some(frame) = self.rx.pop_front() else {
            return Ok(0);
        };
        if frame.len() > buf.len() {
            return Err(NetError::Backend("frame exceeds receive buffer"));
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn send(&mut self, frame: &[u8]) -> Result<usize, NetError> {
        self.tx.push(frame.to_vec());
        Ok(frame.len())
    }
}
