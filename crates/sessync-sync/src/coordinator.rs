//! Single-flight coordination of sync passes.
//!
//! Passes are numbered by generation. A request made while idle starts the
//! next generation; a request made while a pass is running asks for exactly
//! one more pass after it, however many such requests arrive.

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The caller owns the new pass and must run it.
    Started { generation: u64 },
    /// A pass is already running; the request is served by `generation`.
    Coalesced { generation: u64 },
}

impl Acquire {
    pub fn generation(self) -> u64 {
        match self {
            Acquire::Started { generation } | Acquire::Coalesced { generation } => generation,
        }
    }
}

#[derive(Debug, Default)]
struct FlightState {
    running: bool,
    rerun: bool,
    completed: u64,
}

#[derive(Debug, Default)]
pub struct SingleFlight {
    state: Mutex<FlightState>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Acquire {
        let mut state = self.lock();
        if state.running {
            state.rerun = true;
            Acquire::Coalesced {
                generation: state.completed + 2,
            }
        } else {
            state.running = true;
            Acquire::Started {
                generation: state.completed + 1,
            }
        }
    }

    /// Finish the running pass. Returns `true` when a rerun was requested, in
    /// which case the caller still holds the flight and must run again.
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        state.completed += 1;
        if state.rerun {
            state.rerun = false;
            true
        } else {
            state.running = false;
            false
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Generation of the pass currently running, or of the next one.
    pub fn current_generation(&self) -> u64 {
        self.lock().completed + 1
    }

    pub fn completed(&self) -> u64 {
        self.lock().completed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FlightState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
