//! Liveness indicator shown while waiting for events

use std::io::Write;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded, unbounded};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::ScanError;
use crate::service::WaitAborter;

/// Delay between two indicator frames
pub const SPINNER_CADENCE: Duration = Duration::from_millis(100);

/// Indicator frames, drawn in turn at the same position
pub const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];

const SAVE_CURSOR: &str = "\x1b[s";
const RESTORE_CURSOR: &str = "\x1b[u";

enum Command {
    Start,
    Stop(Sender<()>),
}

/// Draws the indicator on a background thread
///
/// The thread only shares the cancellation token with the event loop. When
/// it sees the token set it aborts the wait in flight and exits.
#[derive(Debug)]
pub struct Spinner {
    commands: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Stop(_) => write!(f, "Stop"),
        }
    }
}

impl Spinner {
    /// Spawn the indicator thread writing to `out`
    pub fn spawn<W, A>(out: W, token: CancelToken, aborter: A) -> Result<Self, ScanError>
    where
        W: Write + Send + 'static,
        A: WaitAborter + Send + 'static,
    {
        let (commands, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("scan-spinner".into())
            .spawn(move || spin(out, rx, token, aborter))
            .map_err(|source| ScanError::Thread {
                name: "spinner",
                source,
            })?;

        Ok(Self {
            commands: Some(commands),
            thread: Some(thread),
        })
    }

    /// Start drawing, called right before a wait
    pub fn start(&self) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::Start);
        }
    }

    /// Stop drawing and erase the indicator, called right after a wait
    ///
    /// Returns once the indicator is erased, so no frame is drawn after the
    /// wait returned.
    pub fn stop(&self) {
        if let Some(commands) = &self.commands {
            let (ack_tx, ack_rx) = bounded(1);
            if commands.send(Command::Stop(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.join();
    }
}

fn spin<W, A>(
    mut out: W,
    commands: crossbeam_channel::Receiver<Command>,
    token: CancelToken,
    aborter: A,
) where
    W: Write,
    A: WaitAborter,
{
    let mut active = false;
    let mut frame = 0usize;

    loop {
        match commands.recv_timeout(SPINNER_CADENCE) {
            Ok(Command::Start) => active = true,
            Ok(Command::Stop(ack)) => {
                if active {
                    erase(&mut out);
                    active = false;
                }
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if token.is_cancelled() {
            debug!("spinner saw cancellation");
            aborter.abort_wait();
            break;
        }

        if active {
            let _ = write!(
                out,
                "{SAVE_CURSOR}{}{RESTORE_CURSOR}",
                SPINNER_FRAMES[frame % SPINNER_FRAMES.len()]
            );
            let _ = out.flush();
            frame = frame.wrapping_add(1);
        }
    }

    if active {
        erase(&mut out);
    }
}

fn erase<W: Write>(out: &mut W) {
    let _ = write!(out, "{SAVE_CURSOR} {RESTORE_CURSOR}");
    let _ = out.flush();
}
