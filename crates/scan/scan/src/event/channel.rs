//! Channel-based handling of scanner events

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::event::{ScanEvent, ScanEventHandler};

/// Sender for scanner events
pub type ScanEventSender = Sender<ScanEvent>;
/// Receiver for scanner events
pub type ScanEventReceiver = Receiver<ScanEvent>;

/// Create an unbounded channel for scanner events
pub fn scan_event_channel() -> (ScanEventSender, ScanEventReceiver) {
    unbounded()
}

impl ScanEventHandler for ScanEventSender {
    fn handle_event(&mut self, event: ScanEvent) {
        // A dropped receiver only means nobody listens anymore
        let _ = self.send(event);
    }
}
