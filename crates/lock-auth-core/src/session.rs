//! Session state and the retry policy.
//!
//! A [`Session`] lives as long as the helper process. It owns the identity
//! being authenticated, the failure counter and the shared [`SecretSlot`],
//! and turns each attempt's [`Verdict`] into the next [`Step`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::protocol::ProtocolMessage;
use crate::secret::{CancelReason, SecretSlot};
use crate::traits::{AuthContext, AuthError};

/// Default ceiling on rejected attempts.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Counts rejected attempts up to a fixed ceiling. Never reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptCounter {
    failures: u32,
    ceiling: u32,
}

impl AttemptCounter {
    /// Create a counter with the given ceiling (at least 1).
    pub fn new(ceiling: u32) -> Self {
        Self {
            failures: 0,
            ceiling: ceiling.max(1),
        }
    }

    /// Record one rejected attempt. Returns `true` while retries remain.
    pub fn record_failure(&mut self) -> bool {
        if self.failures < self.ceiling {
            self.failures += 1;
        }
        self.failures < self.ceiling
    }

    /// Number of rejected attempts so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The ceiling.
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Whether the ceiling has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.ceiling
    }
}

impl Default for AttemptCounter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILURES)
    }
}

/// Result of one verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The credential was accepted.
    Accepted,
    /// The attempt failed for any reason.
    Rejected(AuthError),
}

impl From<Result<(), AuthError>> for Verdict {
    fn from(result: Result<(), AuthError>) -> Self {
        match result {
            Ok(()) => Verdict::Accepted,
            Err(e) => Verdict::Rejected(e),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The user authenticated.
    Authenticated,
    /// The session was cancelled.
    Cancelled(CancelReason),
    /// Every attempt up to the ceiling was rejected.
    Exhausted,
}

impl Outcome {
    /// The terminal protocol message for this outcome.
    ///
    /// Running out of attempts and being cancelled look the same on the
    /// wire; the caller dismisses its dialog either way.
    pub fn message(&self) -> ProtocolMessage {
        match self {
            Outcome::Authenticated => ProtocolMessage::Success,
            Outcome::Cancelled(_) | Outcome::Exhausted => ProtocolMessage::Cancelled,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Authenticated => write!(f, "authenticated"),
            Outcome::Cancelled(reason) => write!(f, "cancelled ({})", reason),
            Outcome::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// What the dispatch loop does after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Report the failure and run another attempt.
    Retry,
    /// Report the outcome and shut down.
    Finish(Outcome),
}

/// One helper invocation.
#[derive(Debug)]
pub struct Session {
    context: AuthContext,
    counter: AttemptCounter,
    slot: Arc<SecretSlot>,
    outcome: Option<Outcome>,
}

impl Session {
    /// Create a session for `context` with the given failure ceiling.
    pub fn new(context: AuthContext, max_failures: u32) -> Self {
        Self {
            context,
            counter: AttemptCounter::new(max_failures),
            slot: Arc::new(SecretSlot::new()),
            outcome: None,
        }
    }

    /// The identity being authenticated.
    pub fn context(&self) -> &AuthContext {
        &self.context
    }

    /// The shared secret slot and cancellation flag.
    pub fn slot(&self) -> &Arc<SecretSlot> {
        &self.slot
    }

    /// The failure counter.
    pub fn counter(&self) -> &AttemptCounter {
        &self.counter
    }

    /// How the session ended, once it has.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Whether the session is marked for termination.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Check the cancellation flag before starting an attempt.
    ///
    /// Returns the outcome if the session was cancelled in between attempts.
    pub fn observe_cancellation(&mut self) -> Option<Outcome> {
        if let Some(outcome) = self.outcome {
            return Some(outcome);
        }
        let reason = self.slot.cancel_reason()?;
        debug!(reason = %reason, "Cancellation observed between attempts");
        Some(self.finish(Outcome::Cancelled(reason)))
    }

    /// Apply the retry policy to an attempt's verdict.
    ///
    /// - accepted: finish, authenticated
    /// - rejected while cancelled: finish, cancelled
    /// - rejected below the ceiling: count it and retry
    /// - rejected at the ceiling: finish, exhausted
    pub fn record(&mut self, verdict: Verdict) -> Step {
        if let Some(outcome) = self.outcome {
            return Step::Finish(outcome);
        }

        match verdict {
            Verdict::Accepted => {
                info!(user = %self.context.user, "Authentication succeeded");
                Step::Finish(self.finish(Outcome::Authenticated))
            }
            Verdict::Rejected(error) => {
                if let Some(reason) = self.slot.cancel_reason() {
                    debug!(error = %error, reason = %reason, "Attempt ended by cancellation");
                    return Step::Finish(self.finish(Outcome::Cancelled(reason)));
                }

                if self.counter.record_failure() {
                    info!(
                        error = %error,
                        failures = self.counter.failures(),
                        ceiling = self.counter.ceiling(),
                        "Authentication failed, retrying"
                    );
                    Step::Retry
                } else {
                    info!(
                        error = %error,
                        failures = self.counter.failures(),
                        "Authentication failed, giving up (max failures)"
                    );
                    Step::Finish(self.finish(Outcome::Exhausted))
                }
            }
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.outcome = Some(outcome);
        outcome
    }
}
