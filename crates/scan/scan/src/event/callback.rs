//! Callback-based handling of scanner events

use crate::event::ScanEvent;

/// Trait for handling scanner events
pub trait ScanEventHandler {
    /// Handle a scanner event
    fn handle_event(&mut self, event: ScanEvent);
}

// Implement handlers for closures
impl<F> ScanEventHandler for F
where
    F: FnMut(ScanEvent),
{
    fn handle_event(&mut self, event: ScanEvent) {
        self(event)
    }
}
