//! The dispatch loop.
//!
//! [`Helper::run`] owns the session and is the only writer of protocol
//! output. It starts the stdin monitor, then runs one verification attempt
//! at a time on a blocking worker thread, forwarding the attempt's protocol
//! lines to the caller as they are produced. Between attempts it applies the
//! retry policy; when the session finishes it cancels the monitor and waits
//! for it before returning.

use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use lock_auth_core::{
    AuthContext, AuthError, Authenticator, CancelReason, Config, Outcome, ProtocolError,
    ProtocolMessage, ProtocolWriter, SecretSlot, Session, Step, Verdict,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::driver::{run_attempt, HelperConversation};
use crate::monitor::StdinMonitor;

/// Tunables for one helper run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperOptions {
    /// Longest accepted input line.
    pub max_line_len: usize,
    /// How long to wait for outstanding work once the session is over.
    pub grace: Duration,
}

impl From<&Config> for HelperOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_line_len: config.input.max_line_len,
            grace: config.grace(),
        }
    }
}

impl Default for HelperOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// The authentication helper for one session.
pub struct Helper<A> {
    authenticator: Arc<A>,
    session: Session,
    options: HelperOptions,
}

impl<A: Authenticator + 'static> Helper<A> {
    /// Create a helper from configuration.
    pub fn new(authenticator: A, context: AuthContext, config: &Config) -> Self {
        Self::with_options(
            Arc::new(authenticator),
            Session::new(context, config.auth.max_failures),
            HelperOptions::from(config),
        )
    }

    /// Create a helper from its parts.
    pub fn with_options(authenticator: Arc<A>, session: Session, options: HelperOptions) -> Self {
        Self {
            authenticator,
            session,
            options,
        }
    }

    /// Run the session to completion.
    ///
    /// Returns how the session ended once the terminal line has been written
    /// and the monitor has stopped. A write error ends the session early; the
    /// monitor is still shut down before it is returned.
    pub async fn run<I, W>(mut self, input: I, output: W) -> Result<Outcome, ProtocolError>
    where
        I: Read + AsRawFd + Send + 'static,
        W: Write,
    {
        let slot = Arc::clone(self.session.slot());
        let mut monitor = StdinMonitor::spawn(input, Arc::clone(&slot), self.options.max_line_len)?;
        let mut writer = ProtocolWriter::new(output);

        let result = self.drive(&mut writer, &mut monitor).await;
        match &result {
            Ok(outcome) => info!(outcome = %outcome, "Session finished"),
            Err(e) => warn!(error = %e, "Session ended by output error"),
        }

        shutdown(&slot, monitor, self.options.grace).await;
        result
    }

    async fn drive<W: Write>(
        &mut self,
        writer: &mut ProtocolWriter<W>,
        monitor: &mut StdinMonitor,
    ) -> Result<Outcome, ProtocolError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut deadline: Option<Instant> = None;

        let outcome = loop {
            if let Some(outcome) = self.session.observe_cancellation() {
                break outcome;
            }
            tokio::task::yield_now().await;

            let authenticator = Arc::clone(&self.authenticator);
            let context = self.session.context().clone();
            let mut conversation =
                HelperConversation::new(Arc::clone(self.session.slot()), events_tx.clone());
            let mut attempt = tokio::task::spawn_blocking(move || {
                run_attempt(authenticator.as_ref(), &context, &mut conversation)
            });

            let verdict = loop {
                tokio::select! {
                    biased;

                    Some(message) = events_rx.recv() => writer.send(&message)?,

                    joined = &mut attempt => {
                        break joined.unwrap_or_else(|e| {
                            warn!(error = %e, "Verification task failed");
                            Verdict::Rejected(AuthError::Unavailable(e.to_string()))
                        });
                    }

                    _ = monitor.finished(), if !monitor.is_finished() => {
                        debug!("Stdin monitor finished during an attempt");
                        deadline = Some(Instant::now() + self.options.grace);
                    }

                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() =>
                    {
                        warn!(
                            grace_secs = self.options.grace.as_secs(),
                            "Verification did not return after cancellation, abandoning it"
                        );
                        break Verdict::Rejected(AuthError::Aborted);
                    }
                }
            };

            // Lines produced just before the attempt returned.
            while let Ok(message) = events_rx.try_recv() {
                writer.send(&message)?;
            }

            match self.session.record(verdict) {
                Step::Retry => writer.send(&ProtocolMessage::Failure)?,
                Step::Finish(outcome) => break outcome,
            }
        };

        writer.send(&outcome.message())?;
        Ok(outcome)
    }
}

async fn shutdown(slot: &SecretSlot, mut monitor: StdinMonitor, grace: Duration) {
    slot.cancel(CancelReason::Shutdown);

    if tokio::time::timeout(grace, monitor.finished()).await.is_ok() {
        monitor.join();
        debug!("Stdin monitor stopped");
    } else {
        warn!(grace_secs = grace.as_secs(), "Stdin monitor did not stop in time");
    }

    if slot.clear() {
        debug!("Discarded unconsumed input line");
    }
}
