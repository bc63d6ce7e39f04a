//! Events reported by the scanner

pub mod callback;
pub use callback::*;

pub mod channel;
pub use channel::*;

use std::time::{Duration, SystemTime};

use pcsc::State;

/// Something the scanner wants to tell the user about
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Result of the plug and play check
    PlugAndPlay {
        /// Whether reader arrival is notified by the resource manager
        supported: bool,
        /// Reader list polling interval used otherwise
        poll_interval: Duration,
    },
    /// The reader list is being retrieved
    Scanning,
    /// No reader is attached yet, waiting for one
    WaitingForReader,
    /// A reader appeared while waiting for the first one
    ReaderFound,
    /// Readers being monitored, in index order
    Readers(Vec<String>),
    /// A wait returned with changes
    Changed {
        /// When the change was noticed
        at: SystemTime,
    },
    /// A reader changed state
    Transition(Transition),
    /// A stress batch completed
    Stress(StressReport),
    /// The state table is rebuilt
    Rebuild(RebuildReason),
}

/// State change of one reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Reader index in the state table
    pub index: usize,
    /// Reader name
    pub reader: String,
    /// Event counter reported with the change
    pub event_count: u32,
    /// State acknowledged before the change
    pub previous: State,
    /// New state
    pub state: State,
    /// Labels of the flags set in the new state
    pub labels: Vec<&'static str>,
    /// Formatted ATR, if the new state vouches for one
    pub atr: Option<String>,
}

/// Summary of a stress batch
#[derive(Debug, Clone, PartialEq)]
pub struct StressReport {
    /// Reader name
    pub reader: String,
    /// Completed exchanges
    pub exchanges: u32,
    /// Time spent
    pub elapsed: Duration,
    /// Exchanges per second
    pub rate: f64,
    /// Error that ended the batch, if any
    pub error: Option<String>,
}

/// Why the state table is rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// The plug and play notification reported a reader list change
    ReaderListChanged,
    /// Polling found a different reader list
    ReaderListPolled,
    /// A monitored reader reported an unknown state
    ReaderUnknown,
    /// The resource manager no longer knows a monitored reader
    UnknownReaderInSet,
}
