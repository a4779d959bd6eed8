use crate::errors::*;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

// How long blocked callers sleep between re-checking for errors while they wait on
// something the reader thread will eventually deliver.
pub(crate) const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Lifecycle state shared by connections and channels.
///
/// Transitions normally run `Closed -> Opening -> Open -> Closing -> Closed`; a broker- or
/// network-initiated close may jump straight to `Closed` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Closing,
    Opening,
    Open,
}

/// State plus an append-only exception queue. Owned by both `Connection` and `Channel`.
///
/// The reader thread appends errors here instead of raising them; caller threads drain them
/// through `check_for_errors`.
pub(crate) struct Stateful {
    state: Mutex<State>,
    state_changed: Condvar,
    exceptions: Mutex<VecDeque<Error>>,
}

impl Stateful {
    pub(crate) fn new() -> Stateful {
        Stateful {
            state: Mutex::new(State::Closed),
            state_changed: Condvar::new(),
            exceptions: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: State) {
        let mut current = self.state.lock().unwrap();
        *current = state;
        self.state_changed.notify_all();
    }

    #[inline]
    pub(crate) fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    #[inline]
    pub(crate) fn is_opening(&self) -> bool {
        self.state() == State::Opening
    }

    #[inline]
    pub(crate) fn is_closing(&self) -> bool {
        self.state() == State::Closing
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    pub(crate) fn push_exception(&self, err: Error) {
        self.exceptions.lock().unwrap().push_back(err);
    }

    pub(crate) fn first_exception(&self) -> Option<Error> {
        self.exceptions.lock().unwrap().front().cloned()
    }

    pub(crate) fn pop_exception(&self) -> Option<Error> {
        self.exceptions.lock().unwrap().pop_front()
    }

    pub(crate) fn has_exceptions(&self) -> bool {
        !self.exceptions.lock().unwrap().is_empty()
    }

    pub(crate) fn clear_exceptions(&self) {
        self.exceptions.lock().unwrap().clear();
    }

    pub(crate) fn exceptions(&self) -> Vec<Error> {
        self.exceptions.lock().unwrap().iter().cloned().collect()
    }

    /// Block until the state becomes `target`.
    ///
    /// `check` runs before every wait; its error aborts the wait. Returns
    /// `ConnectionTimeout` once `timeout` has elapsed.
    pub(crate) fn wait_for_state<F>(&self, target: State, timeout: Duration, mut check: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state() == target {
                return Ok(());
            }
            check()?;
            if Instant::now() >= deadline {
                return ConnectionTimeoutSnafu {
                    waiting_for: target,
                }
                .fail();
            }
            let state = self.state.lock().unwrap();
            if *state == target {
                return Ok(());
            }
            let _ = self.state_changed.wait_timeout(state, IDLE_WAIT).unwrap();
        }
    }
}
