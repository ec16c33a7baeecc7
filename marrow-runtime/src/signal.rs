//! # Interrupt Signals
//!
//! Cooperative cancellation for the evaluator. A host (console driver,
//! embedding application, watchdog thread) raises a signal on a shared
//! [`SignalFlag`]; the evaluator polls the flag at safe points, between
//! expressions and on each iteration of loop natives, and converts a
//! pending signal into an unwind. Nothing is interrupted mid-operation
//! and no OS signal handling happens here.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Interrupt kinds, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Signal {
    /// Nothing pending.
    None = 0,
    /// Abandon the current top-level unit, then keep going.
    Escape = 1,
    /// Stop evaluation entirely.
    Halt = 2,
}

impl Signal {
    fn from_u8(raw: u8) -> Signal {
        match raw {
            1 => Signal::Escape,
            2 => Signal::Halt,
            _ => Signal::None,
        }
    }
}

/// Shared interrupt flag. Clones observe the same state.
///
/// Raising only ever upgrades severity: an escape does not downgrade a
/// pending halt.
#[derive(Debug, Clone, Default)]
pub struct SignalFlag {
    state: Arc<AtomicU8>,
}

impl SignalFlag {
    /// A flag with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise `signal`, keeping the more severe of it and what is
    /// already pending.
    pub fn raise(&self, signal: Signal) {
        self.state.fetch_max(signal as u8, Ordering::SeqCst);
    }

    /// The currently pending signal, left in place.
    pub fn pending(&self) -> Signal {
        Signal::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Take and clear the pending signal.
    pub fn take(&self) -> Signal {
        Signal::from_u8(self.state.swap(Signal::None as u8, Ordering::SeqCst))
    }

    /// Drop anything pending.
    pub fn clear(&self) {
        self.state.store(Signal::None as u8, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================
