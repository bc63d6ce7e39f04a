//! PC/SC reader discovery and card state monitoring
//!
//! This crate watches the readers known to the PC/SC resource manager and
//! reports every change of reader presence and card state: insertion and
//! removal, reader arrival and departure, exclusive or shared use. The ATR of
//! inserted cards is decoded and can be handed to an external analysis
//! command, and inserted cards can optionally be stressed with repeated
//! exchanges.
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use nexum_pcsc_scan::{CancelToken, PcscMonitor, ScanConfig, ScanEvent, Session};
//!
//! let session = Session::open()?;
//! let config = ScanConfig::new().with_atr_analysis(false);
//! let token = CancelToken::new();
//!
//! let mut monitor = PcscMonitor::new(&session, &config, token, |event: ScanEvent| {
//!     println!("{:?}", event);
//! });
//! monitor.run()?;
//! drop(monitor);
//!
//! session.close()?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod atr;
mod cancel;
mod config;
mod directory;
mod error;
pub mod event;
mod monitor;
mod service;
mod session;
mod spinner;
mod state;
pub mod stress;

// Public exports
pub use atr::{AtrAnalyzer, format_atr};
pub use cancel::{CancelToken, Canceller};
pub use config::{
    DEFAULT_ATR_PARSER, DEFAULT_POLL_INTERVAL, DEFAULT_STRESS_BATCH, DEFAULT_WAIT_TIMEOUT,
    ScanConfig,
};
pub use directory::ReaderDirectory;
pub use error::ScanError;
pub use event::{RebuildReason, ScanEvent, ScanEventHandler, StressReport, Transition};
pub use monitor::{PcscMonitor, WaitOutcome};
pub use service::{CardChannel, CardService, PcscAborter, PcscChannel, PcscService, WaitAborter};
pub use session::Session;
pub use spinner::{SPINNER_CADENCE, SPINNER_FRAMES, Spinner};
pub use state::{MAX_ATR_SIZE, ReaderSlot, StateTable, has_valid_atr, state_labels};
pub use stress::{SELECT_MF, StressResult};

// Re-export the state flags for convenience
pub use pcsc::State;
