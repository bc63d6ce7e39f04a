//! Throughput stress of an inserted card

use std::ffi::CStr;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::ScanError;
use crate::service::{CardChannel, CardService};

/// SELECT of the master file (root directory)
pub const SELECT_MF: [u8; 7] = [0x00, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00];

/// Size of the response buffer
const RESPONSE_BUFFER_SIZE: usize = 258;

/// Outcome of one stress batch
#[derive(Debug)]
pub struct StressResult {
    /// Completed exchanges
    pub exchanges: u32,
    /// Wall-clock time spent exchanging
    pub elapsed: Duration,
    /// Error that ended the batch early
    pub error: Option<ScanError>,
}

impl StressResult {
    /// Exchanges per second, zero when nothing was measured
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if self.exchanges == 0 || secs <= 0.0 {
            0.0
        } else {
            f64::from(self.exchanges) / secs
        }
    }

    /// Whether the batch completed without error
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Send [`SELECT_MF`] up to `batch` times to the card in `reader`
///
/// The batch stops early on the first failed exchange or when `token` is
/// cancelled. Connect and disconnect failures are reported in the result.
pub fn run_batch<S: CardService>(
    service: &S,
    reader: &CStr,
    batch: u32,
    token: &CancelToken,
) -> StressResult {
    let name = reader.to_string_lossy();
    let start = Instant::now();

    let mut channel = match service.connect(reader) {
        Ok(channel) => channel,
        Err(e) => {
            warn!("stress connect to {} failed: {}", name, e);
            return StressResult {
                exchanges: 0,
                elapsed: start.elapsed(),
                error: Some(ScanError::card("SCardConnect", name, e)),
            };
        }
    };

    let mut buffer = [0u8; RESPONSE_BUFFER_SIZE];
    let mut exchanges = 0;
    let mut error = None;

    while exchanges < batch && !token.is_cancelled() {
        match channel.transmit(&SELECT_MF, &mut buffer) {
            Ok(response) => {
                if exchanges == 0 {
                    debug!("stress response: {}", hex::encode_upper(response));
                }
                exchanges += 1;
            }
            Err(e) => {
                error = Some(ScanError::card("SCardTransmit", name.as_ref(), e));
                break;
            }
        }
    }
    let elapsed = start.elapsed();

    if let Err(e) = channel.disconnect() {
        warn!("stress disconnect from {} failed: {}", name, e);
        error.get_or_insert(ScanError::card("SCardDisconnect", name, e));
    }

    StressResult {
        exchanges,
        elapsed,
        error,
    }
}
