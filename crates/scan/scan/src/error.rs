//! Error types for the reader scanner

use std::io;

/// Errors raised while scanning readers
///
/// Timeouts, topology changes and cancellation are not errors, see
/// [`WaitOutcome`](crate::WaitOutcome).
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The resource manager could not be reached
    #[error("PC/SC resource manager unavailable: {0}")]
    ServiceUnavailable(#[source] pcsc::Error),

    /// The resource manager answered an operation with an unexpected status
    #[error("{operation}: {source}")]
    Service {
        /// Name of the failed resource manager call
        operation: &'static str,
        /// Status returned by the resource manager
        #[source]
        source: pcsc::Error,
    },

    /// Connecting, transmitting or disconnecting a card failed
    #[error("{operation} on {reader}: {source}")]
    CardOperation {
        /// Name of the failed card operation
        operation: &'static str,
        /// Reader holding the card
        reader: String,
        /// Status returned by the resource manager
        #[source]
        source: pcsc::Error,
    },

    /// The ATR analysis command could not be executed
    #[error("{command}: {source}")]
    Subprocess {
        /// Command line that failed
        command: String,
        /// Spawn or wait error
        #[source]
        source: io::Error,
    },

    /// The ATR analysis command ran but exited unsuccessfully
    #[error("{command}: exited with {status}")]
    SubprocessStatus {
        /// Command line that failed
        command: String,
        /// Exit status description
        status: String,
    },

    /// Interrupt handlers could not be installed
    #[error("cannot register signal handler: {0}")]
    Signal(#[source] io::Error),

    /// A helper thread could not be spawned
    #[error("cannot spawn {name} thread: {source}")]
    Thread {
        /// Thread name
        name: &'static str,
        /// Spawn error
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    /// Wrap a resource manager status returned by `operation`
    pub const fn service(operation: &'static str, source: pcsc::Error) -> Self {
        Self::Service { operation, source }
    }

    /// Wrap a failed card operation on `reader`
    pub fn card(operation: &'static str, reader: impl Into<String>, source: pcsc::Error) -> Self {
        Self::CardOperation {
            operation,
            reader: reader.into(),
            source,
        }
    }
}
