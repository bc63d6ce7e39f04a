//! Reader and card event loop
//!
//! The loop alternates between two phases. While `Enumerating` it lists the
//! readers (waiting for the first one if needed) and builds a fresh
//! [`StateTable`]. While `Monitoring` it blocks on the table until a reader
//! changes and reports every transition. A reader list change, a reader
//! reported as unknown, or a reader the resource manager no longer knows
//! sends it back to `Enumerating`; the old table is dropped, never patched.

use std::ffi::CStr;
use std::time::SystemTime;

use pcsc::State;
use tracing::{debug, error, info, warn};

use crate::atr::{AtrAnalyzer, format_atr};
use crate::cancel::CancelToken;
use crate::config::ScanConfig;
use crate::directory::ReaderDirectory;
use crate::error::ScanError;
use crate::event::{RebuildReason, ScanEvent, ScanEventHandler, StressReport, Transition};
use crate::service::CardService;
use crate::session::Session;
use crate::spinner::Spinner;
use crate::state::{StateTable, has_valid_atr, state_labels};
use crate::stress;

/// Outcome of one status change wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// At least one slot changed
    Changed,
    /// Nothing changed before the timeout
    Timeout,
    /// The wait was aborted by a cancellation request
    Cancelled,
    /// A monitored reader vanished since enumeration
    UnknownReaderInSet,
}

enum Phase {
    Enumerating,
    Monitoring(StateTable),
}

enum Step {
    Continue,
    Rebuild(RebuildReason),
    Stop,
}

/// Event loop reporting reader and card state changes
#[allow(missing_debug_implementations)]
pub struct PcscMonitor<'a, S: CardService, H> {
    service: &'a S,
    config: &'a ScanConfig,
    token: CancelToken,
    handler: H,
    spinner: Option<&'a Spinner>,
    analyzer: Option<AtrAnalyzer>,
    pnp: bool,
}

impl<'a, S: CardService, H: ScanEventHandler> PcscMonitor<'a, S, H> {
    /// Create a monitor over `session`
    pub fn new(
        session: &'a Session<S>,
        config: &'a ScanConfig,
        token: CancelToken,
        handler: H,
    ) -> Self {
        let analyzer = config
            .analyse_atr
            .then(|| AtrAnalyzer::new(config.atr_parser.clone()));
        Self {
            service: session.service(),
            config,
            token,
            handler,
            spinner: None,
            analyzer,
            pnp: config.force_pnp,
        }
    }

    /// Show `spinner` while waiting
    pub const fn with_spinner(mut self, spinner: &'a Spinner) -> Self {
        self.spinner = Some(spinner);
        self
    }

    const fn directory(&self) -> ReaderDirectory<'a, S> {
        ReaderDirectory::new(self.service, self.config)
    }

    /// Run until cancelled or a fatal resource manager error
    pub fn run(&mut self) -> Result<(), ScanError> {
        self.pnp = self.config.force_pnp || self.directory().detect_pnp();
        if self.pnp {
            info!("using reader plug and play mechanism");
        } else {
            info!(
                "plug and play not supported, polling every {:?}",
                self.config.poll_interval
            );
        }
        self.handler.handle_event(ScanEvent::PlugAndPlay {
            supported: self.pnp,
            poll_interval: self.config.poll_interval,
        });

        let mut phase = Phase::Enumerating;
        loop {
            if self.token.is_cancelled() {
                debug!("monitor cancelled");
                return Ok(());
            }

            phase = match phase {
                Phase::Enumerating => match self.enumerate()? {
                    Some(table) => Phase::Monitoring(table),
                    None => return Ok(()),
                },
                Phase::Monitoring(mut table) => match self.step(&mut table)? {
                    Step::Continue => Phase::Monitoring(table),
                    Step::Rebuild(reason) => {
                        debug!("rebuilding state table: {:?}", reason);
                        self.handler.handle_event(ScanEvent::Rebuild(reason));
                        Phase::Enumerating
                    }
                    Step::Stop => return Ok(()),
                },
            };
        }
    }

    fn enumerate(&mut self) -> Result<Option<StateTable>, ScanError> {
        self.handler.handle_event(ScanEvent::Scanning);
        let directory = self.directory();
        let Some(readers) =
            directory.wait_for_readers(self.pnp, &self.token, self.spinner, &mut self.handler)?
        else {
            return Ok(None);
        };

        let names = readers
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        self.handler.handle_event(ScanEvent::Readers(names));

        Ok(Some(StateTable::new(readers, self.pnp)))
    }

    /// Block until a slot of `table` changes, the timeout elapses or the wait is aborted
    pub fn wait(&self, table: &mut StateTable) -> Result<WaitOutcome, ScanError> {
        if self.token.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }

        if let Some(spinner) = self.spinner {
            spinner.start();
        }
        let result = self
            .service
            .get_status_change(self.config.wait_timeout, table.slots_mut());
        if let Some(spinner) = self.spinner {
            spinner.stop();
        }

        match result {
            Ok(()) => Ok(WaitOutcome::Changed),
            Err(pcsc::Error::Timeout) => Ok(WaitOutcome::Timeout),
            Err(pcsc::Error::Cancelled) => Ok(WaitOutcome::Cancelled),
            Err(pcsc::Error::UnknownReader) => Ok(WaitOutcome::UnknownReaderInSet),
            Err(e) => {
                error!("SCardGetStatusChange: {}", e);
                Err(ScanError::service("SCardGetStatusChange", e))
            }
        }
    }

    fn step(&mut self, table: &mut StateTable) -> Result<Step, ScanError> {
        match self.wait(table)? {
            WaitOutcome::Cancelled => Ok(Step::Stop),
            WaitOutcome::UnknownReaderInSet => {
                Ok(Step::Rebuild(RebuildReason::UnknownReaderInSet))
            }
            WaitOutcome::Timeout => {
                if !self.pnp && self.reader_list_changed(table) {
                    Ok(Step::Rebuild(RebuildReason::ReaderListPolled))
                } else {
                    Ok(Step::Continue)
                }
            }
            WaitOutcome::Changed => self.dispatch(table),
        }
    }

    /// Without plug and play, new readers are only found by listing again
    fn reader_list_changed(&self, table: &StateTable) -> bool {
        match self.directory().list() {
            Ok(names) => table.differs_from(&names),
            Err(e) => {
                debug!("polling reader list failed: {}", e);
                false
            }
        }
    }

    fn dispatch(&mut self, table: &mut StateTable) -> Result<Step, ScanError> {
        if table.topology_changed() {
            return Ok(Step::Rebuild(RebuildReason::ReaderListChanged));
        }
        if !self.pnp && self.reader_list_changed(table) {
            return Ok(Step::Rebuild(RebuildReason::ReaderListPolled));
        }

        self.handler.handle_event(ScanEvent::Changed {
            at: SystemTime::now(),
        });

        for index in 0..table.reader_count() {
            let Some(slot) = table.reader_mut(index) else {
                break;
            };
            if !slot.has_changed() {
                continue;
            }

            let previous = slot.acknowledge();
            let state = slot.current_state();
            let reader = slot.display_name();
            let atr = slot.valid_atr().map(format_atr);

            self.handler.handle_event(ScanEvent::Transition(Transition {
                index,
                reader: reader.clone(),
                event_count: slot.event_count(),
                previous,
                state,
                labels: state_labels(state),
                atr: atr.clone(),
            }));

            if state.contains(State::UNKNOWN) {
                info!("reader {} is unknown", reader);
                return Ok(Step::Rebuild(RebuildReason::ReaderUnknown));
            }

            if let (Some(analyzer), Some(atr)) = (&self.analyzer, &atr)
                && let Err(e) = analyzer.analyse(atr)
            {
                warn!("ATR analysis failed: {}", e);
            }

            if self.config.stress && has_valid_atr(state) {
                let name = slot.name().to_owned();
                self.stress(&name, &reader);
                slot.reset();
            }

            if self.token.is_cancelled() {
                return Ok(Step::Stop);
            }
        }

        Ok(Step::Continue)
    }

    /// Stress the card in `reader` until a batch fails or cancellation
    fn stress(&mut self, name: &CStr, reader: &str) {
        loop {
            let result = stress::run_batch(
                self.service,
                name,
                self.config.stress_batch,
                &self.token,
            );
            let rate = result.rate();
            let failed = !result.is_ok();
            self.handler.handle_event(ScanEvent::Stress(StressReport {
                reader: reader.to_string(),
                exchanges: result.exchanges,
                elapsed: result.elapsed,
                rate,
                error: result.error.map(|e| e.to_string()),
            }));

            if failed || self.token.is_cancelled() {
                break;
            }
        }
    }
}
