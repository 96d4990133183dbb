//! Secret handoff between the input reader and the conversation handler.
//!
//! The reader thread publishes each line it receives as a [`PendingSecret`]
//! into a [`SecretSlot`]; the conversation handler blocks on the slot until a
//! line arrives or the session is cancelled. The slot holds at most one
//! unconsumed secret, so a second line waits until the first is taken.
//!
//! The slot also carries the session's cancellation flag. Both live behind the
//! same mutex and every critical section is a pointer swap, never I/O.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use secrecy::{ExposeSecret, SecretBox};
use tracing::trace;
use zeroize::Zeroize;

use crate::protocol::InputKind;

/// A captured input line. Zeroed when dropped.
pub struct PendingSecret {
    bytes: SecretBox<[u8]>,
}

impl PendingSecret {
    /// Copy `buffer` into a new secret and scrub the source.
    ///
    /// The copy is allocated at its final size so no intermediate
    /// reallocation leaves plaintext behind.
    pub fn from_buffer(buffer: &mut [u8]) -> Self {
        let copy: Box<[u8]> = Box::from(&buffer[..]);
        buffer.zeroize();
        Self {
            bytes: SecretBox::new(copy),
        }
    }

    /// How this line should be interpreted.
    pub fn kind(&self) -> InputKind {
        InputKind::decode(self.bytes.expose_secret())
    }

    /// Length of the secret in bytes.
    pub fn len(&self) -> usize {
        self.bytes.expose_secret().len()
    }

    /// Whether the secret is an empty line.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExposeSecret<[u8]> for PendingSecret {
    fn expose_secret(&self) -> &[u8] {
        self.bytes.expose_secret()
    }
}

impl From<&str> for PendingSecret {
    fn from(value: &str) -> Self {
        let mut buffer = value.as_bytes().to_vec();
        Self::from_buffer(&mut buffer)
    }
}

impl fmt::Debug for PendingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Why a session was cancelled. The first reason recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller sent the exit request.
    ExitRequested,
    /// The caller's input stream ended or failed.
    InputClosed,
    /// The helper is shutting down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::ExitRequested => write!(f, "exit_requested"),
            CancelReason::InputClosed => write!(f, "input_closed"),
            CancelReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Result of waiting for a secret.
#[derive(Debug)]
pub enum Handoff {
    /// A line from the caller. Ownership moves to the consumer.
    Secret(PendingSecret),
    /// The session was cancelled before a line arrived.
    Cancelled(CancelReason),
}

#[derive(Default)]
struct SlotState {
    pending: Option<PendingSecret>,
    cancelled: Option<CancelReason>,
}

/// Single-entry rendezvous for secrets plus the cancellation flag.
#[derive(Default)]
pub struct SecretSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl SecretSlot {
    /// Create an empty, uncancelled slot.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // The state stays consistent across a panic in another holder: every
        // critical section is a single field assignment.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, SlotState>) -> MutexGuard<'a, SlotState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a secret to the consumer.
    ///
    /// Blocks while a previous secret is still pending. Returns `false`, and
    /// drops (zeroes) the secret, if the session is cancelled first.
    pub fn publish(&self, secret: PendingSecret) -> bool {
        let mut state = self.lock();
        while state.pending.is_some() && state.cancelled.is_none() {
            state = self.wait(state);
        }
        if state.cancelled.is_some() {
            return false;
        }
        trace!(len = secret.len(), "Secret published");
        state.pending = Some(secret);
        self.changed.notify_all();
        true
    }

    /// Wait for the next secret or for cancellation.
    ///
    /// Cancellation takes precedence over a pending secret.
    pub fn take(&self) -> Handoff {
        let mut state = self.lock();
        loop {
            if let Some(reason) = state.cancelled {
                return Handoff::Cancelled(reason);
            }
            if let Some(secret) = state.pending.take() {
                self.changed.notify_all();
                return Handoff::Secret(secret);
            }
            state = self.wait(state);
        }
    }

    /// Wait until the pending secret has been taken.
    ///
    /// Returns `false` if the session is cancelled first. The producer calls
    /// this before reading further input, so nothing behind an unconsumed
    /// line (end of stream included) can overtake it.
    pub fn wait_consumed(&self) -> bool {
        let mut state = self.lock();
        while state.pending.is_some() && state.cancelled.is_none() {
            state = self.wait(state);
        }
        state.cancelled.is_none()
    }

    /// Whether a secret is waiting to be consumed.
    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Set the cancellation flag and wake every waiter.
    ///
    /// Returns `true` if this call cancelled the session, `false` if it was
    /// already cancelled (the first reason is kept).
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let mut state = self.lock();
        let first = state.cancelled.is_none();
        if first {
            state.cancelled = Some(reason);
        }
        self.changed.notify_all();
        first
    }

    /// Whether the session has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled.is_some()
    }

    /// The reason the session was cancelled, if it was.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.lock().cancelled
    }

    /// Drop any unconsumed secret. Returns whether one was discarded.
    pub fn clear(&self) -> bool {
        let discarded = self.lock().pending.take();
        self.changed.notify_all();
        // Zeroed here, outside the lock.
        discarded.is_some()
    }
}

impl fmt::Debug for SecretSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SecretSlot")
            .field("pending", &state.pending.is_some())
            .field("cancelled", &state.cancelled)
            .finish()
    }
}
