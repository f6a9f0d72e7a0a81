use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::llm::LiveSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    /// Transport healthy, sender and receiver running
    Normal = 0,
    /// Transport being replaced; the sender waits, the receiver ignores errors
    Reconnecting = 1,
    /// Terminal
    Stopped = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Normal,
            1 => SessionState::Reconnecting,
            _ => SessionState::Stopped,
        }
    }
}

/// Session state variable; every write is an atomic transition and nothing
/// leaves `Stopped`.
#[derive(Debug)]
pub struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move to `next` from any non-terminal state.
    ///
    /// Returns false if the state was already `Stopped`.
    pub fn transition(&self, next: SessionState) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current == SessionState::Stopped as u8 {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }

    /// Move from `current` to `next`; fails if the state is anything else.
    pub fn compare_set(&self, current: SessionState, next: SessionState) -> bool {
        if current == SessionState::Stopped {
            return false;
        }
        self.0
            .compare_exchange(
                current as u8,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Enter the terminal state; returns the previous state.
    pub fn stop(&self) -> SessionState {
        SessionState::from_u8(self.0.swap(SessionState::Stopped as u8, Ordering::SeqCst))
    }

    pub fn is_stopped(&self) -> bool {
        self.load() == SessionState::Stopped
    }
}

/// Shared handle to the current transport, replaced as a whole.
///
/// Readers clone the `Arc` and use their copy; they observe either the old or
/// the new session, never a mix.
#[derive(Default)]
pub struct SessionSlot {
    inner: RwLock<Option<Arc<dyn LiveSession>>>,
}

impl SessionSlot {
    pub fn new(session: Arc<dyn LiveSession>) -> Self {
        Self {
            inner: RwLock::new(Some(session)),
        }
    }

    pub fn load(&self) -> Option<Arc<dyn LiveSession>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `session`, returning the one it replaced
    pub fn replace(&self, session: Arc<dyn LiveSession>) -> Option<Arc<dyn LiveSession>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(session)
    }

    pub fn take(&self) -> Option<Arc<dyn LiveSession>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_some(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
