//! Thread-safe holder for the one `ControllerState` every task reads or
//! writes.
//!
//! A plain mutex around a `Copy` struct is enough to guarantee no reader
//! ever observes a torn state: every access takes the whole value in one
//! lock, never a field at a time.

use std::sync::Mutex;

use crate::controller::ControllerState;

#[derive(Default)]
pub struct SharedState(Mutex<ControllerState>);

impl SharedState {
    pub fn new(state: ControllerState) -> Self {
        Self(Mutex::new(state))
    }

    pub fn get(&self) -> ControllerState {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, state: ControllerState) {
        *self.0.lock().unwrap() = state;
    }

    /// Replace the state, returning the previous value — used by INPUT and
    /// macro-step handling, which both need a snapshot to restore later.
    pub fn swap(&self, state: ControllerState) -> ControllerState {
        std::mem::replace(&mut self.0.lock().unwrap(), state)
    }
}
