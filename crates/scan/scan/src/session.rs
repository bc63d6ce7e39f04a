//! Session with the resource manager

use tracing::{debug, warn};

use crate::error::ScanError;
use crate::service::{CardService, PcscService};

/// Owns the connection to the resource manager
///
/// [`Session::close`] consumes the session, so it can be released at most
/// once. A session dropped without being closed still releases the
/// underlying service when the service itself is dropped.
#[derive(Debug)]
pub struct Session<S: CardService = PcscService> {
    service: S,
}

impl Session<PcscService> {
    /// Establish a session with the system PC/SC service
    pub fn open() -> Result<Self, ScanError> {
        PcscService::establish()
            .map(Self::new)
            .map_err(ScanError::ServiceUnavailable)
    }
}

impl<S: CardService> Session<S> {
    /// Wrap an already established service
    pub const fn new(service: S) -> Self {
        Self { service }
    }

    /// Get the underlying service
    pub const fn service(&self) -> &S {
        &self.service
    }

    /// Release the session
    pub fn close(self) -> Result<(), ScanError> {
        match self.service.release() {
            Ok(()) => {
                debug!("session released");
                Ok(())
            }
            Err(pcsc::Error::CantDispose) => {
                // Still referenced by a helper thread, released with the last clone
                warn!("session still in use, deferring release");
                Ok(())
            }
            Err(e) => Err(ScanError::service("SCardReleaseContext", e)),
        }
    }
}
