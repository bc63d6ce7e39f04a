//! ATR formatting and external analysis

use std::fmt::Write as _;
use std::process::Command;

use tracing::debug;

use crate::error::ScanError;

/// Format an ATR as space separated uppercase hex pairs
///
/// `[0x3B, 0x00]` formats as `"3B 00"` and an empty ATR as `""`.
pub fn format_atr(atr: &[u8]) -> String {
    let mut out = String::with_capacity(atr.len() * 3);
    for (i, byte) in atr.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Runs the external ATR analysis command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtrAnalyzer {
    program: String,
}

impl AtrAnalyzer {
    /// Create an analyzer running `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Hand a formatted ATR to the analysis command
    ///
    /// The command inherits the console; its output is not parsed.
    pub fn analyse(&self, atr: &str) -> Result<(), ScanError> {
        let command = format!("{} '{}'", self.program, atr);
        debug!("running {}", command);

        let status = Command::new(&self.program)
            .arg(atr)
            .status()
            .map_err(|source| ScanError::Subprocess {
                command: command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ScanError::SubprocessStatus {
                command,
                status: status.to_string(),
            })
        }
    }
}
