//! Per-reader state tracking

use std::ffi::{CStr, CString};

use pcsc::State;

/// Maximum length of an ATR
pub const MAX_ATR_SIZE: usize = 33;

/// Human readable labels for each reported state flag, in report order
const STATE_LABELS: [(State, &str); 10] = [
    (State::IGNORE, "Ignore this reader"),
    (State::UNKNOWN, "Reader unknown"),
    (State::UNAVAILABLE, "Status unavailable"),
    (State::EMPTY, "Card removed"),
    (State::PRESENT, "Card inserted"),
    (State::ATRMATCH, "ATR matches card"),
    (State::EXCLUSIVE, "Exclusive Mode"),
    (State::INUSE, "Shared Mode"),
    (State::MUTE, "Unresponsive card"),
    (State::UNPOWERED, "Unpowered card"),
];

/// Labels of the flags set in `state`
pub fn state_labels(state: State) -> Vec<&'static str> {
    STATE_LABELS
        .iter()
        .filter(|(flag, _)| state.contains(*flag))
        .map(|(_, label)| *label)
        .collect()
}

/// Whether `state` describes a card whose ATR can be trusted
pub const fn has_valid_atr(state: State) -> bool {
    state.contains(State::PRESENT) && !state.intersects(State::MUTE.union(State::UNKNOWN))
}

/// State of one monitored reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSlot {
    /// Reader name as reported by the resource manager
    name: CString,
    /// Last acknowledged state
    current: State,
    /// State returned by the latest wait
    event: State,
    /// Event counter of the last acknowledged state
    current_count: u32,
    /// Event counter returned by the latest wait
    event_count: u32,
    /// ATR returned by the latest wait
    atr: Vec<u8>,
}

impl ReaderSlot {
    /// Create a slot whose state must be refreshed by the first wait
    pub fn new(name: CString) -> Self {
        Self {
            name,
            current: State::UNAWARE,
            event: State::UNAWARE,
            current_count: 0,
            event_count: 0,
            atr: Vec::with_capacity(MAX_ATR_SIZE),
        }
    }

    /// Get the reader name
    pub fn name(&self) -> &CStr {
        &self.name
    }

    /// Get the reader name as a display string
    pub fn display_name(&self) -> String {
        self.name.to_string_lossy().into_owned()
    }

    /// Last acknowledged state
    pub const fn current_state(&self) -> State {
        self.current
    }

    /// State returned by the latest wait
    pub const fn event_state(&self) -> State {
        self.event
    }

    /// Event counter returned by the latest wait
    pub const fn event_count(&self) -> u32 {
        self.event_count
    }

    /// Raw ATR bytes returned by the latest wait
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// ATR bytes, if the latest state vouches for them
    pub fn valid_atr(&self) -> Option<&[u8]> {
        (has_valid_atr(self.event) && !self.atr.is_empty()).then_some(self.atr.as_slice())
    }

    /// Record the result of a wait
    pub fn record(&mut self, event: State, atr: &[u8], event_count: u32) {
        let len = atr.len().min(MAX_ATR_SIZE);
        self.event = event;
        self.event_count = event_count;
        self.atr.clear();
        self.atr.extend_from_slice(&atr[..len]);
    }

    /// Whether the latest wait reported a change not yet acknowledged
    pub fn has_changed(&self) -> bool {
        self.event.contains(State::CHANGED)
            && (self.event != self.current || self.event_count != self.current_count)
    }

    /// Adopt the latest state as current, returning the previous one
    pub const fn acknowledge(&mut self) -> State {
        let previous = self.current;
        self.current = self.event;
        self.current_count = self.event_count;
        previous
    }

    /// Forget the current state so the next wait resynchronizes
    pub const fn reset(&mut self) {
        self.current = State::UNAWARE;
    }
}

/// Table of monitored readers
///
/// The table is built from one directory listing and never resized. When
/// plug and play is supported a trailing notification slot is kept after
/// the readers.
#[derive(Debug, Clone)]
pub struct StateTable {
    slots: Vec<ReaderSlot>,
    pnp: bool,
}

impl StateTable {
    /// Build a table for `readers`, appending the notification slot if `pnp`
    pub fn new(readers: Vec<CString>, pnp: bool) -> Self {
        let mut slots: Vec<ReaderSlot> = readers.into_iter().map(ReaderSlot::new).collect();
        if pnp {
            slots.push(ReaderSlot::new(pcsc::PNP_NOTIFICATION().to_owned()));
        }
        Self { slots, pnp }
    }

    /// Whether the table carries a notification slot
    pub const fn has_notification(&self) -> bool {
        self.pnp
    }

    /// Number of real readers
    pub const fn reader_count(&self) -> usize {
        self.slots.len() - self.pnp as usize
    }

    /// Real readers, in directory order
    pub fn readers(&self) -> &[ReaderSlot] {
        &self.slots[..self.reader_count()]
    }

    /// Mutable access to one real reader
    pub fn reader_mut(&mut self, index: usize) -> Option<&mut ReaderSlot> {
        let count = self.reader_count();
        self.slots[..count].get_mut(index)
    }

    /// All slots handed to the wait, notification slot included
    pub fn slots_mut(&mut self) -> &mut [ReaderSlot] {
        &mut self.slots
    }

    /// Whether the notification slot reports a reader list change
    pub fn topology_changed(&self) -> bool {
        self.pnp
            && self
                .slots
                .last()
                .is_some_and(|slot| slot.event_state().contains(State::CHANGED))
    }

    /// Whether `names` differs from the readers of this table
    pub fn differs_from(&self, names: &[CString]) -> bool {
        let readers = self.readers();
        readers.len() != names.len()
            || readers
                .iter()
                .zip(names)
                .any(|(slot, name)| slot.name() != name.as_c_str())
    }
}
