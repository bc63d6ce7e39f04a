//! Resource manager abstraction and its PC/SC implementation

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::fmt;
use std::time::Duration;

use pcsc::{Card, Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State};
use tracing::{debug, warn};

use crate::state::ReaderSlot;

/// Aborts a status change wait in flight on another thread
pub trait WaitAborter {
    /// Make the pending wait return `Cancelled`
    fn abort_wait(&self);
}

/// Connection to a card, used to exchange APDUs
pub trait CardChannel {
    /// Send `command` and receive the response into `buffer`
    fn transmit<'b>(&mut self, command: &[u8], buffer: &'b mut [u8])
    -> Result<&'b [u8], pcsc::Error>;

    /// Close the connection
    fn disconnect(self) -> Result<(), pcsc::Error>;
}

/// Resource manager arbitrating access to the readers
pub trait CardService {
    /// Card connection type
    type Channel: CardChannel;

    /// Handle able to abort a wait from another thread
    type Aborter: WaitAborter + Clone + Send + Sync + 'static;

    /// Names of the currently known readers
    ///
    /// An empty list is returned when no reader is available.
    fn list_readers(&self) -> Result<Vec<CString>, pcsc::Error>;

    /// Block until a slot differs from its current state or `timeout` elapses
    ///
    /// On success every slot is updated with its event state, ATR and event
    /// counter.
    fn get_status_change(
        &self,
        timeout: Duration,
        slots: &mut [ReaderSlot],
    ) -> Result<(), pcsc::Error>;

    /// Open a shared connection to the card in `reader`
    fn connect(&self, reader: &CStr) -> Result<Self::Channel, pcsc::Error>;

    /// Handle aborting the waits of this service
    fn aborter(&self) -> Self::Aborter;

    /// Release the service
    fn release(self) -> Result<(), pcsc::Error>;
}

/// Resource manager backed by the system PC/SC service
pub struct PcscService {
    /// PC/SC context
    context: Context,
    /// Reader states of the previous wait, carrying the event counters
    states: RefCell<Vec<ReaderState>>,
}

impl fmt::Debug for PcscService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscService").finish_non_exhaustive()
    }
}

impl PcscService {
    /// Establish a new PC/SC context
    pub fn establish() -> Result<Self, pcsc::Error> {
        let context = Context::establish(Scope::User)?;
        debug!("PC/SC context established");
        Ok(Self {
            context,
            states: RefCell::new(Vec::new()),
        })
    }
}

impl CardService for PcscService {
    type Channel = PcscChannel;
    type Aborter = PcscAborter;

    fn list_readers(&self) -> Result<Vec<CString>, pcsc::Error> {
        match self.context.list_readers_owned() {
            Ok(readers) => Ok(readers),
            Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn get_status_change(
        &self,
        timeout: Duration,
        slots: &mut [ReaderSlot],
    ) -> Result<(), pcsc::Error> {
        let mut reader_states = self.states.borrow_mut();
        let same_readers = reader_states.len() == slots.len()
            && reader_states
                .iter()
                .zip(slots.iter())
                .all(|(rs, slot)| rs.name() == slot.name());

        if same_readers {
            for (rs, slot) in reader_states.iter_mut().zip(slots.iter()) {
                if slot.current_state() == State::UNAWARE {
                    *rs = ReaderState::new(slot.name().to_owned(), State::UNAWARE);
                } else if rs.event_state() == slot.current_state() {
                    // Acknowledged, keep the event counter along with the state
                    rs.sync_current_state();
                }
            }
        } else {
            *reader_states = slots
                .iter()
                .map(|slot| ReaderState::new(slot.name().to_owned(), slot.current_state()))
                .collect();
        }

        self.context
            .get_status_change(Some(timeout), &mut reader_states[..])?;

        for (slot, rs) in slots.iter_mut().zip(reader_states.iter()) {
            slot.record(rs.event_state(), rs.atr(), rs.event_count());
        }
        Ok(())
    }

    fn connect(&self, reader: &CStr) -> Result<Self::Channel, pcsc::Error> {
        let card = self
            .context
            .connect(reader, ShareMode::Shared, Protocols::ANY)?;
        Ok(PcscChannel { card })
    }

    fn aborter(&self) -> Self::Aborter {
        PcscAborter {
            context: self.context.clone(),
        }
    }

    fn release(self) -> Result<(), pcsc::Error> {
        match self.context.release() {
            Ok(()) => Ok(()),
            Err((_context, e)) => Err(e),
        }
    }
}

/// Card connection over PC/SC
pub struct PcscChannel {
    card: Card,
}

impl fmt::Debug for PcscChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscChannel").finish_non_exhaustive()
    }
}

impl CardChannel for PcscChannel {
    fn transmit<'b>(
        &mut self,
        command: &[u8],
        buffer: &'b mut [u8],
    ) -> Result<&'b [u8], pcsc::Error> {
        self.card.transmit(command, buffer)
    }

    fn disconnect(self) -> Result<(), pcsc::Error> {
        // Leaving the card powered down is fine, the next wait resynchronizes
        self.card
            .disconnect(Disposition::UnpowerCard)
            .map_err(|(_card, e)| e)
    }
}

/// Aborts the waits of a [`PcscService`]
#[derive(Clone)]
pub struct PcscAborter {
    context: Context,
}

impl fmt::Debug for PcscAborter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscAborter").finish_non_exhaustive()
    }
}

impl WaitAborter for PcscAborter {
    fn abort_wait(&self) {
        if let Err(e) = self.context.cancel() {
            warn!("SCardCancel: {}", e);
        }
    }
}
