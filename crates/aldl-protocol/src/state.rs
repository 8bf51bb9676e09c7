//! Connection State Tracking

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Connection state shared between the acquisition loop and its consumers.
///
/// Codes below 10 are reserved for connected sub-states. Everything at or
/// above 10 means the link is not usable, including the control states
/// [`ConnectionState::Quit`] and [`ConnectionState::Pause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    Connected = 0,
    Connecting = 11,
    Loading = 12,
    Desync = 13,
    Error = 14,
    Laggy = 15,
    SerialError = 16,
    Quit = 51,
    Pause = 52,
}

impl ConnectionState {
    /// Numeric state code
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// True for any state that does not allow data retrieval
    pub fn is_disconnected(&self) -> bool {
        self.code() >= 10
    }

    /// Human-readable state name
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "Connected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Loading => "Loading",
            ConnectionState::Desync => "Lost Sync",
            ConnectionState::Error => "Error",
            ConnectionState::Laggy => "Laggy",
            ConnectionState::SerialError => "Serial ERR",
            ConnectionState::Quit => "Quit",
            ConnectionState::Pause => "Paused",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of past states kept by [`StateCell`]
pub const STATE_HISTORY_LEN: usize = 32;

#[derive(Debug)]
struct Inner {
    current: ConnectionState,
    /// States entered, oldest first
    history: VecDeque<ConnectionState>,
}

impl Inner {
    fn enter(&mut self, next: ConnectionState) {
        if self.current == next {
            return;
        }
        debug!("Connection state {} -> {}", self.current, next);
        self.current = next;
        if self.history.len() == STATE_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(next);
    }
}

/// Lock-protected connection state cell
#[derive(Debug)]
pub struct StateCell {
    inner: Mutex<Inner>,
}

impl StateCell {
    pub fn new(initial: ConnectionState) -> Self {
        let mut history = VecDeque::with_capacity(STATE_HISTORY_LEN);
        history.push_back(initial);
        Self {
            inner: Mutex::new(Inner {
                current: initial,
                history,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> ConnectionState {
        self.lock().current
    }

    pub fn set(&self, next: ConnectionState) {
        self.lock().enter(next);
    }

    /// Set `next` unless a quit or pause has been requested. Returns whether
    /// the state was changed.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.lock();
        if matches!(inner.current, ConnectionState::Quit | ConnectionState::Pause) {
            return false;
        }
        inner.enter(next);
        true
    }

    /// Shortcut for `get() == Quit`
    pub fn quit_requested(&self) -> bool {
        self.get() == ConnectionState::Quit
    }

    /// The last [`STATE_HISTORY_LEN`] states entered, oldest first
    pub fn history(&self) -> Vec<ConnectionState> {
        self.lock().history.iter().copied().collect()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Loading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_threshold() {
        assert!(!ConnectionState::Connected.is_disconnected());
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Loading,
            ConnectionState::Desync,
            ConnectionState::Error,
            ConnectionState::Laggy,
            ConnectionState::SerialError,
            ConnectionState::Quit,
            ConnectionState::Pause,
        ] {
            assert!(state.is_disconnected(), "{} should be disconnected", state);
        }
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(ConnectionState::Connected.code(), 0);
        assert_eq!(ConnectionState::Desync.code(), 13);
        assert_eq!(ConnectionState::SerialError.code(), 16);
        assert_eq!(ConnectionState::Quit.code(), 51);
        assert_eq!(ConnectionState::Pause.code(), 52);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::Desync.to_string(), "Lost Sync");
        assert_eq!(ConnectionState::SerialError.name(), "Serial ERR");
        assert_eq!(ConnectionState::Pause.name(), "Paused");
    }

    #[test]
    fn test_cell_get_set() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), ConnectionState::Loading);
        cell.set(ConnectionState::Quit);
        assert!(cell.quit_requested());
    }

    #[test]
    fn test_transition_keeps_control_states() {
        let cell = StateCell::new(ConnectionState::Connected);
        assert!(cell.transition(ConnectionState::Desync));
        assert_eq!(cell.get(), ConnectionState::Desync);

        cell.set(ConnectionState::Quit);
        assert!(!cell.transition(ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Quit);
    }

    #[test]
    fn test_history_records_changes_only() {
        let cell = StateCell::default();
        cell.transition(ConnectionState::Connecting);
        cell.transition(ConnectionState::Connected);
        cell.transition(ConnectionState::Connected);
        cell.transition(ConnectionState::Desync);
        assert_eq!(
            cell.history(),
            vec![
                ConnectionState::Loading,
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Desync,
            ]
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let cell = StateCell::new(ConnectionState::Connected);
        for _ in 0..STATE_HISTORY_LEN {
            cell.set(ConnectionState::Laggy);
            cell.set(ConnectionState::Connected);
        }
        let history = cell.history();
        assert_eq!(history.len(), STATE_HISTORY_LEN);
        assert_eq!(history.last(), Some(&ConnectionState::Connected));
    }
}
