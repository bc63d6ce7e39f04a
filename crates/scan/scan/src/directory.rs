//! Reader enumeration

use std::collections::HashSet;
use std::ffi::CString;
use std::time::Duration;

use pcsc::State;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::event::{ScanEvent, ScanEventHandler};
use crate::service::CardService;
use crate::spinner::Spinner;
use crate::state::ReaderSlot;

/// Queries the resource manager for the attached readers
#[derive(Debug)]
pub struct ReaderDirectory<'a, S> {
    service: &'a S,
    config: &'a ScanConfig,
}

impl<'a, S: CardService> ReaderDirectory<'a, S> {
    /// Create a directory over `service`
    pub const fn new(service: &'a S, config: &'a ScanConfig) -> Self {
        Self { service, config }
    }

    /// Check whether the resource manager notifies reader arrival and removal
    ///
    /// A single zero-timeout wait on the notification name tells: a service
    /// without support reports it as an unknown reader.
    pub fn detect_pnp(&self) -> bool {
        let mut slots = [ReaderSlot::new(pcsc::PNP_NOTIFICATION().to_owned())];
        match self.service.get_status_change(Duration::ZERO, &mut slots) {
            Ok(()) | Err(pcsc::Error::Timeout) => {
                !slots[0].event_state().contains(State::UNKNOWN)
            }
            Err(e) => {
                debug!("plug and play check failed: {}", e);
                false
            }
        }
    }

    /// Names of the attached readers, in resource manager order
    pub fn list(&self) -> Result<Vec<CString>, ScanError> {
        let mut readers = self
            .service
            .list_readers()
            .map_err(|e| ScanError::service("SCardListReaders", e))?;

        // Names are unique within one listing
        let mut seen = HashSet::with_capacity(readers.len());
        readers.retain(|name| seen.insert(name.clone()));
        Ok(readers)
    }

    /// Current state of every attached reader, without waiting for changes
    pub fn snapshot(&self) -> Result<Vec<ReaderSlot>, ScanError> {
        let mut slots: Vec<ReaderSlot> = self.list()?.into_iter().map(ReaderSlot::new).collect();
        for slot in &mut slots {
            match self
                .service
                .get_status_change(Duration::ZERO, std::slice::from_mut(slot))
            {
                Ok(()) | Err(pcsc::Error::Timeout) => {}
                Err(e) => return Err(ScanError::service("SCardGetStatusChange", e)),
            }
        }
        Ok(slots)
    }

    /// List readers, waiting until at least one is attached
    ///
    /// With plug and play the wait blocks on the notification slot, otherwise
    /// the list is polled. Returns `None` when cancelled first.
    pub fn wait_for_readers<H: ScanEventHandler>(
        &self,
        pnp: bool,
        token: &CancelToken,
        spinner: Option<&Spinner>,
        handler: &mut H,
    ) -> Result<Option<Vec<CString>>, ScanError> {
        let mut waited = false;

        loop {
            if token.is_cancelled() {
                return Ok(None);
            }

            let readers = self.list()?;
            if !readers.is_empty() {
                if waited {
                    handler.handle_event(ScanEvent::ReaderFound);
                }
                return Ok(Some(readers));
            }

            if !waited {
                info!("no reader attached, waiting for the first one");
                handler.handle_event(ScanEvent::WaitingForReader);
                waited = true;
            }

            if let Some(spinner) = spinner {
                spinner.start();
            }
            let result = if pnp {
                let mut slots = [ReaderSlot::new(pcsc::PNP_NOTIFICATION().to_owned())];
                self.service
                    .get_status_change(self.config.wait_timeout, &mut slots)
            } else {
                token.sleep(self.config.poll_interval);
                Ok(())
            };
            if let Some(spinner) = spinner {
                spinner.stop();
            }

            match result {
                Ok(()) | Err(pcsc::Error::Timeout) | Err(pcsc::Error::Cancelled) => {}
                Err(e) => return Err(ScanError::service("SCardGetStatusChange", e)),
            }
        }
    }
}
