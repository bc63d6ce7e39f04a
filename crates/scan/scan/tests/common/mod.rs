//! Scripted resource manager for monitor tests

#![allow(dead_code, unreachable_pub)]

use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, CString};
use std::sync::Arc;
use std::time::Duration;

use nexum_pcsc_scan::{
    CancelToken, CardChannel, CardService, ReaderSlot, ScanConfig, ScanEvent, State, WaitAborter,
};
use parking_lot::{Condvar, Mutex};

/// Name of the plug and play notification slot
pub fn pnp_name() -> String {
    pcsc::PNP_NOTIFICATION().to_string_lossy().into_owned()
}

/// Configuration with short timeouts and no external command
pub fn test_config() -> ScanConfig {
    ScanConfig::new()
        .with_atr_analysis(false)
        .with_wait_timeout(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(10))
}

/// One scripted answer to a status change wait
#[derive(Debug, Clone)]
pub enum Step {
    /// The named slots change to the given state and ATR
    Change(Vec<(String, State, Vec<u8>)>),
    /// The attached readers become `readers`, the notification slot changes
    Attach(Vec<String>),
    /// The wait fails with a status
    Fail(pcsc::Error),
}

/// Build a change of one slot
pub fn change(name: &str, state: State, atr: &[u8]) -> (String, State, Vec<u8>) {
    (name.to_string(), state, atr.to_vec())
}

#[derive(Debug, Default)]
struct MockState {
    readers: Vec<CString>,
    pnp: bool,
    steps: VecDeque<Step>,
    /// After this many listings, the readers become the given ones
    attach_after_lists: Option<(usize, Vec<CString>)>,
    /// Block on waits once the script is exhausted instead of cancelling
    idle: bool,
    abortable: bool,
    aborted: bool,
    cards: HashMap<String, (State, Vec<u8>, u32)>,
    list_calls: usize,
    /// Current states handed to each scripted wait
    observed: Vec<Vec<(String, State)>>,
    transmit_failure_after: Option<u32>,
    transmits: u32,
    connects: u32,
    disconnects: u32,
    released: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockState>,
    wakeup: Condvar,
}

/// In-memory resource manager following a script
#[derive(Debug, Clone)]
pub struct MockService {
    shared: Arc<Shared>,
    token: CancelToken,
}

impl MockService {
    /// Create a service with `readers` attached, cancelling `token` once the script ends
    pub fn new(readers: &[&str], pnp: bool, token: CancelToken) -> Self {
        let service = Self {
            shared: Arc::new(Shared::default()),
            token,
        };
        {
            let mut state = service.shared.state.lock();
            state.readers = readers.iter().map(|r| CString::new(*r).unwrap()).collect();
            state.pnp = pnp;
            state.abortable = true;
        }
        service
    }

    /// Append scripted wait answers
    pub fn script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.shared.state.lock().steps.extend(steps);
        self
    }

    /// Switch the attached readers after `lists` listings
    pub fn attach_after_lists(self, lists: usize, readers: &[&str]) -> Self {
        self.shared.state.lock().attach_after_lists = Some((
            lists,
            readers.iter().map(|r| CString::new(*r).unwrap()).collect(),
        ));
        self
    }

    /// Block on every wait once the script is exhausted
    pub fn idle(self, abortable: bool) -> Self {
        {
            let mut state = self.shared.state.lock();
            state.idle = true;
            state.abortable = abortable;
        }
        self
    }

    /// Fail every transmission after `count` successful ones
    pub fn fail_transmit_after(self, count: u32) -> Self {
        self.shared.state.lock().transmit_failure_after = Some(count);
        self
    }

    /// Current states handed to each scripted wait
    pub fn observed(&self) -> Vec<Vec<(String, State)>> {
        self.shared.state.lock().observed.clone()
    }

    /// Number of successful transmissions
    pub fn transmits(&self) -> u32 {
        self.shared.state.lock().transmits
    }

    /// Number of connections and disconnections
    pub fn connections(&self) -> (u32, u32) {
        let state = self.shared.state.lock();
        (state.connects, state.disconnects)
    }

    /// Whether the service was released
    pub fn released(&self) -> bool {
        self.shared.state.lock().released
    }

    fn is_pnp_check(timeout: Duration, slots: &[ReaderSlot]) -> bool {
        timeout.is_zero()
            && slots.len() == 1
            && slots[0].name() == pcsc::PNP_NOTIFICATION()
    }
}

fn name_of(slot: &ReaderSlot) -> String {
    slot.name().to_string_lossy().into_owned()
}

impl CardService for MockService {
    type Channel = MockChannel;
    type Aborter = MockAborter;

    fn list_readers(&self) -> Result<Vec<CString>, pcsc::Error> {
        let mut state = self.shared.state.lock();
        state.list_calls += 1;
        let due = matches!(&state.attach_after_lists, Some((lists, _)) if state.list_calls > *lists);
        if due && let Some((_, readers)) = state.attach_after_lists.take() {
            state.readers = readers;
        }
        Ok(state.readers.clone())
    }

    fn get_status_change(
        &self,
        timeout: Duration,
        slots: &mut [ReaderSlot],
    ) -> Result<(), pcsc::Error> {
        let mut state = self.shared.state.lock();

        if Self::is_pnp_check(timeout, slots) {
            let detected = if state.pnp {
                State::UNAWARE
            } else {
                State::UNKNOWN
            };
            slots[0].record(detected, &[], 0);
            return Ok(());
        }

        if timeout.is_zero() {
            // Snapshot of the current card states
            for slot in slots.iter_mut() {
                let (card, atr, count) = state
                    .cards
                    .get(&name_of(slot))
                    .cloned()
                    .unwrap_or((State::EMPTY, Vec::new(), 0));
                slot.record(card | State::CHANGED, &atr, count);
            }
            return Ok(());
        }

        state.observed.push(
            slots
                .iter()
                .map(|slot| (name_of(slot), slot.current_state()))
                .collect(),
        );

        // Unchanged slots report their current state
        for slot in slots.iter_mut() {
            let current = slot.current_state() - State::CHANGED;
            let atr = slot.atr().to_vec();
            let count = slot.event_count();
            slot.record(current, &atr, count);
        }

        let Some(step) = state.steps.pop_front() else {
            if !state.idle {
                self.token.cancel();
                return Err(pcsc::Error::Cancelled);
            }
            let timed_out = self
                .shared
                .wakeup
                .wait_while_for(&mut state, |s| !s.aborted, timeout)
                .timed_out();
            if timed_out {
                return Err(pcsc::Error::Timeout);
            }
            state.aborted = false;
            return Err(pcsc::Error::Cancelled);
        };

        match step {
            Step::Fail(e) => Err(e),
            Step::Attach(readers) => {
                state.readers = readers
                    .iter()
                    .map(|r| CString::new(r.as_str()).unwrap())
                    .collect();
                for slot in slots.iter_mut() {
                    if slot.name() == pcsc::PNP_NOTIFICATION() {
                        slot.record(State::CHANGED, &[], 0);
                    }
                }
                Ok(())
            }
            Step::Change(changes) => {
                for (name, new_state, atr) in changes {
                    let entry = state
                        .cards
                        .entry(name.clone())
                        .or_insert_with(|| (State::EMPTY, Vec::new(), 0));
                    entry.0 = new_state;
                    entry.1.clone_from(&atr);
                    entry.2 += 1;
                    let count = entry.2;

                    if let Some(slot) = slots.iter_mut().find(|slot| name_of(slot) == name) {
                        slot.record(new_state | State::CHANGED, &atr, count);
                    }
                }
                Ok(())
            }
        }
    }

    fn connect(&self, _reader: &CStr) -> Result<Self::Channel, pcsc::Error> {
        self.shared.state.lock().connects += 1;
        Ok(MockChannel {
            shared: Arc::clone(&self.shared),
        })
    }

    fn aborter(&self) -> Self::Aborter {
        MockAborter {
            shared: Arc::clone(&self.shared),
        }
    }

    fn release(self) -> Result<(), pcsc::Error> {
        self.shared.state.lock().released = true;
        Ok(())
    }
}

/// Card connection of a [`MockService`]
#[derive(Debug)]
pub struct MockChannel {
    shared: Arc<Shared>,
}

impl CardChannel for MockChannel {
    fn transmit<'b>(
        &mut self,
        _command: &[u8],
        buffer: &'b mut [u8],
    ) -> Result<&'b [u8], pcsc::Error> {
        let mut state = self.shared.state.lock();
        if state
            .transmit_failure_after
            .is_some_and(|limit| state.transmits >= limit)
        {
            return Err(pcsc::Error::RemovedCard);
        }
        state.transmits += 1;
        buffer[..2].copy_from_slice(&[0x90, 0x00]);
        Ok(&buffer[..2])
    }

    fn disconnect(self) -> Result<(), pcsc::Error> {
        self.shared.state.lock().disconnects += 1;
        Ok(())
    }
}

/// Aborter of a [`MockService`]
#[derive(Debug, Clone)]
pub struct MockAborter {
    shared: Arc<Shared>,
}

impl WaitAborter for MockAborter {
    fn abort_wait(&self) {
        let mut state = self.shared.state.lock();
        if state.abortable {
            state.aborted = true;
            self.shared.wakeup.notify_all();
        }
    }
}

/// Collect the events of a run
pub fn collector(events: &Arc<Mutex<Vec<ScanEvent>>>) -> impl FnMut(ScanEvent) + use<> {
    let events = Arc::clone(events);
    move |event| events.lock().push(event)
}
