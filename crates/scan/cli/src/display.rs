//! Console rendering of scanner events

use std::ffi::CStr;
use std::io::{self, Write};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use colored::{Color, Colorize};
use nexum_pcsc_scan::{RebuildReason, ReaderSlot, ScanEvent, StressReport, Transition, format_atr};
use tracing::debug;

/// Timestamp layout of change reports
const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Output styling, decided once at startup
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    color: bool,
}

impl Palette {
    /// Create a palette, colored when `color` is set
    pub const fn new(color: bool) -> Self {
        Self { color }
    }

    /// Paint `text` with `color` if colors are enabled
    pub fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    /// Paint `text` in bold if colors are enabled
    pub fn bold(&self, text: &str) -> String {
        if self.color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }
}

/// Prints scanner events in the classic line-oriented layout
#[derive(Debug)]
pub struct Console<'a, W> {
    palette: &'a Palette,
    debug: bool,
    out: W,
}

impl<'a, W: Write> Console<'a, W> {
    /// Create a console printing to `out` with `palette`
    pub const fn new(palette: &'a Palette, debug: bool, out: W) -> Self {
        Self {
            palette,
            debug,
            out,
        }
    }

    /// Print one event
    pub fn render(&mut self, event: &ScanEvent) {
        if let Err(e) = self.write_event(event) {
            debug!("cannot write report: {}", e);
        }
    }

    fn write_event(&mut self, event: &ScanEvent) -> io::Result<()> {
        let p = self.palette;
        match event {
            ScanEvent::PlugAndPlay {
                supported: true, ..
            } => writeln!(
                self.out,
                "{}",
                p.paint("Using reader plug'n play mechanism", Color::Magenta)
            ),
            ScanEvent::PlugAndPlay {
                supported: false,
                poll_interval,
            } => writeln!(
                self.out,
                "{}",
                p.paint(
                    &format!(
                        "Plug'n play reader name not supported. Using polling every {} ms.",
                        poll_interval.as_millis()
                    ),
                    Color::Magenta
                )
            ),
            ScanEvent::Scanning => writeln!(
                self.out,
                "{}",
                p.paint("Scanning present readers...", Color::Red)
            ),
            ScanEvent::WaitingForReader => {
                write!(
                    self.out,
                    "{}",
                    p.paint("Waiting for the first reader...", Color::Red)
                )?;
                self.out.flush()
            }
            ScanEvent::ReaderFound => writeln!(self.out, "found one"),
            ScanEvent::Readers(readers) => {
                for (index, name) in readers.iter().enumerate() {
                    writeln!(
                        self.out,
                        "{}",
                        p.paint(&format!("{index}: {name}"), Color::Blue)
                    )?;
                }
                Ok(())
            }
            ScanEvent::Changed { at } => writeln!(self.out, "\n{}", timestamp(*at)),
            ScanEvent::Transition(transition) => self.transition(transition),
            ScanEvent::Stress(report) => self.stress(report),
            ScanEvent::Rebuild(reason) if self.debug => writeln!(
                self.out,
                " [debug] rebuilding reader table: {}",
                rebuild_reason(*reason)
            ),
            ScanEvent::Rebuild(_) => Ok(()),
        }
    }

    fn transition(&mut self, transition: &Transition) -> io::Result<()> {
        let p = self.palette;
        writeln!(
            self.out,
            "Reader {}: {}",
            transition.index,
            p.paint(&transition.reader, Color::Magenta)
        )?;
        if transition.event_count > 0 {
            writeln!(self.out, "  Event number: {}", transition.event_count)?;
        }
        if self.debug {
            writeln!(
                self.out,
                " [debug] previous 0x{:04X}, new 0x{:04X}",
                transition.previous.bits(),
                transition.state.bits()
            )?;
        }

        let mut labels = String::new();
        for label in &transition.labels {
            labels.push_str(label);
            labels.push_str(", ");
        }
        writeln!(self.out, "  Card state: {}", p.paint(&labels, Color::Red))?;

        if let Some(atr) = &transition.atr {
            writeln!(self.out, "  ATR: {}", p.paint(atr, Color::Magenta))?;
        }
        Ok(())
    }

    fn stress(&mut self, report: &StressReport) -> io::Result<()> {
        let p = self.palette;
        writeln!(
            self.out,
            "  Stress {}: {} exchanges in {:.3} s, {:.1} APDU/s",
            report.reader,
            p.bold(&report.exchanges.to_string()),
            report.elapsed.as_secs_f64(),
            report.rate
        )?;
        if let Some(error) = &report.error {
            writeln!(self.out, "  {}", p.paint(error, Color::Red))?;
        }
        Ok(())
    }

    /// Print the attached readers, one per line
    pub fn reader_list(&mut self, readers: &[impl AsRef<CStr>]) -> io::Result<()> {
        let p = self.palette;
        if readers.is_empty() {
            return writeln!(self.out, "{}", p.paint("No reader found", Color::Red));
        }
        for (index, name) in readers.iter().enumerate() {
            writeln!(
                self.out,
                "{}",
                p.paint(
                    &format!("{index}: {}", name.as_ref().to_string_lossy()),
                    Color::Blue
                )
            )?;
        }
        Ok(())
    }

    /// Print each reader with the ATR of its card
    pub fn card_list(&mut self, slots: &[ReaderSlot]) -> io::Result<()> {
        let p = self.palette;
        if slots.is_empty() {
            return writeln!(self.out, "{}", p.paint("No reader found", Color::Red));
        }
        for (index, slot) in slots.iter().enumerate() {
            writeln!(
                self.out,
                "{index}: {}",
                p.paint(&slot.display_name(), Color::Blue)
            )?;
            match slot.valid_atr() {
                Some(atr) => writeln!(
                    self.out,
                    "  ATR: {}",
                    p.paint(&format_atr(atr), Color::Magenta)
                )?,
                None => writeln!(self.out, "  {}", p.paint("no card", Color::Red))?,
            }
        }
        Ok(())
    }
}

fn timestamp(at: SystemTime) -> String {
    DateTime::<Local>::from(at)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

const fn rebuild_reason(reason: RebuildReason) -> &'static str {
    match reason {
        RebuildReason::ReaderListChanged => "reader list changed",
        RebuildReason::ReaderListPolled => "reader list differs",
        RebuildReason::ReaderUnknown => "reader unknown",
        RebuildReason::UnknownReaderInSet => "reader vanished",
    }
}
