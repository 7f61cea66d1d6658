use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::can::{CanAdapter, CanFrame, MAX_FRAME_LEN};

/// Anything attached to the simulated bus that reacts to frames the tester transmits
pub trait BusPeer {
    fn on_frame(&mut self, frame: &CanFrame) -> Vec<CanFrame>;
}

/// Mock CAN interface for exercising the transport and session layers without hardware.
/// Frames can be injected by hand, or produced by an attached [`BusPeer`].
pub struct MockAdapter {
    incoming: RefCell<VecDeque<CanFrame>>,
    sent: RefCell<Vec<CanFrame>>,
    peer: RefCell<Option<Box<dyn BusPeer>>>,
    output_enabled: Cell<bool>,
    clear_count: Cell<usize>,
    /// Frames handed out per recv() call, 0 means everything queued
    batch: Cell<usize>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            incoming: RefCell::new(VecDeque::new()),
            sent: RefCell::new(Vec::new()),
            peer: RefCell::new(None),
            output_enabled: Cell::new(true),
            clear_count: Cell::new(0),
            batch: Cell::new(0),
        }
    }

    pub fn with_peer(peer: impl BusPeer + 'static) -> Self {
        let mock = Self::new();
        mock.attach(peer);
        mock
    }

    pub fn attach(&self, peer: impl BusPeer + 'static) {
        *self.peer.borrow_mut() = Some(Box::new(peer));
    }

    /// Queue a frame as if it had just arrived on the bus
    pub fn inject(&self, address: u32, data: &[u8], bus: u8) {
        self.incoming
            .borrow_mut()
            .push_back(CanFrame::new(address, data, bus));
    }

    pub fn set_batch(&self, frames_per_recv: usize) {
        self.batch.set(frames_per_recv);
    }

    /// Every frame transmitted through this adapter, in order
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.borrow().clone()
    }

    /// Payloads transmitted to one address, in order
    pub fn sent_to(&self, address: u32) -> Vec<Vec<u8>> {
        self.sent
            .borrow()
            .iter()
            .filter(|f| f.address == address)
            .map(|f| f.data.clone())
            .collect()
    }

    pub fn clear_count(&self) -> usize {
        self.clear_count.get()
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enabled.get()
    }

    pub fn queued(&self) -> usize {
        self.incoming.borrow().len()
    }
}

impl CanAdapter for MockAdapter {
    fn send(&self, address: u32, data: &[u8], bus: u8, _timeout_ms: u32) -> Result<(), String> {
        if !self.output_enabled.get() {
            return Err("output disabled".into());
        }
        if data.len() > MAX_FRAME_LEN {
            return Err(format!("frame too long: {} bytes", data.len()));
        }

        let frame = CanFrame::new(address, data, bus);
        self.sent.borrow_mut().push(frame.clone());

        if let Some(peer) = self.peer.borrow_mut().as_mut() {
            let replies = peer.on_frame(&frame);
            self.incoming.borrow_mut().extend(replies);
        }
        Ok(())
    }

    fn recv(&self) -> Result<Vec<CanFrame>, String> {
        let mut incoming = self.incoming.borrow_mut();
        let take = match self.batch.get() {
            0 => incoming.len(),
            n => n.min(incoming.len()),
        };
        Ok(incoming.drain(..take).collect())
    }

    fn clear(&self) -> Result<(), String> {
        self.incoming.borrow_mut().clear();
        self.clear_count.set(self.clear_count.get() + 1);
        Ok(())
    }

    fn set_output_enabled(&self, enabled: bool) -> Result<(), String> {
        self.output_enabled.set(enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl BusPeer for Echo {
        fn on_frame(&mut self, frame: &CanFrame) -> Vec<CanFrame> {
            vec![CanFrame::new(frame.address + 1, &frame.data, frame.bus)]
        }
    }

    #[test]
    fn test_mock_tracks_sent() {
        let mock = MockAdapter::new();
        mock.send(0x200, &[0x09, 0xC0], 0, 100).unwrap();
        mock.send(0x740, &[0xA3], 0, 100).unwrap();

        let sent = mock.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].address, 0x200);
        assert_eq!(mock.sent_to(0x740), vec![vec![0xA3]]);
    }

    #[test]
    fn test_mock_rejects_long_frame() {
        let mock = MockAdapter::new();
        assert!(mock.send(0x200, &[0; 9], 0, 100).is_err());
        assert!(mock.sent_frames().is_empty());
    }

    #[test]
    fn test_mock_output_disabled() {
        let mock = MockAdapter::new();
        mock.set_output_enabled(false).unwrap();
        assert!(mock.send(0x200, &[0x01], 0, 100).is_err());
        mock.set_output_enabled(true).unwrap();
        assert!(mock.send(0x200, &[0x01], 0, 100).is_ok());
    }

    #[test]
    fn test_mock_peer_replies() {
        let mock = MockAdapter::with_peer(Echo);
        mock.send(0x300, &[0x01, 0x02], 0, 100).unwrap();
        let rx = mock.recv().unwrap();
        assert_eq!(rx, vec![CanFrame::new(0x301, &[0x01, 0x02], 0)]);
        assert!(mock.recv().unwrap().is_empty());
    }

    #[test]
    fn test_mock_batching() {
        let mock = MockAdapter::new();
        for i in 0..5 {
            mock.inject(0x100 + i, &[i as u8], 0);
        }
        mock.set_batch(2);
        assert_eq!(mock.recv().unwrap().len(), 2);
        assert_eq!(mock.recv().unwrap().len(), 2);
        assert_eq!(mock.recv().unwrap().len(), 1);
        assert!(mock.recv().unwrap().is_empty());
    }

    #[test]
    fn test_mock_clear() {
        let mock = MockAdapter::new();
        mock.inject(0x300, &[0x10], 0);
        mock.clear().unwrap();
        assert_eq!(mock.queued(), 0);
        assert_eq!(mock.clear_count(), 1);
    }
}
