// Shared state of the exclusive console session.
//
// `ConsoleSession` records whether the session is Clean (the next order can
// run as-is) or Dirty (an order left residual state and the session must be
// restarted first), plus the most recent join code and the visitors last seen
// on the island. Only the execution worker marks the session dirty; the
// worker and the restore supervisor mark it clean after a successful restart.
//
// The console itself serves one operation at a time. Every call into the
// link that changes or reads the session (execute, restart, snapshot, idle
// action) is made while holding the console guard. The worker takes it with
// `lock_console` and waits; the supervisor takes it with `try_lock_console`
// and skips its cycle when an order is in flight.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::debug;

use crate::external::SessionCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Clean,
    Dirty,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Clean => write!(f, "Good"),
            SessionState::Dirty => write!(f, "Bad"),
        }
    }
}

#[derive(Default)]
struct SessionInner {
    state: SessionState,
    code: Option<SessionCode>,
    visitors: Vec<String>,
}

/// Exclusive access to the console link while held.
pub type ConsoleGuard<'a> = MutexGuard<'a, ()>;

#[derive(Default)]
pub struct ConsoleSession {
    inner: Mutex<SessionInner>,
    access: Mutex<()>,
}

impl ConsoleSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_dirty(&self) -> bool {
        self.state() == SessionState::Dirty
    }

    pub fn mark_dirty(&self) {
        let mut inner = self.lock();
        if inner.state != SessionState::Dirty {
            debug!("console session marked dirty");
            inner.state = SessionState::Dirty;
        }
    }

    /// Record a completed restart: the session is clean and reachable with
    /// `code`.
    pub fn mark_restarted(&self, code: SessionCode) {
        let mut inner = self.lock();
        inner.state = SessionState::Clean;
        inner.code = Some(code);
    }

    pub fn session_code(&self) -> Option<SessionCode> {
        self.lock().code.clone()
    }

    /// Block until no other loop is using the console.
    pub fn lock_console(&self) -> ConsoleGuard<'_> {
        self.access.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the console guard only if it is free.
    pub fn try_lock_console(&self) -> Option<ConsoleGuard<'_>> {
        match self.access.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Replace the known visitor list and return the names that were not in
    /// the previous one, in snapshot order.
    pub fn record_visitors(&self, visitors: Vec<String>) -> Vec<String> {
        let mut inner = self.lock();
        let arrived = visitors
            .iter()
            .filter(|name| !inner.visitors.contains(*name))
            .cloned()
            .collect();
        inner.visitors = visitors;
        arrived
    }

    /// Visitors seen in the most recent snapshot.
    pub fn visitors(&self) -> Vec<String> {
        self.lock().visitors.clone()
    }
}
