//! Mock authenticator for testing.
//!
//! This module provides a configurable implementation of [`Authenticator`]
//! that runs a scripted PAM-style conversation without a PAM stack.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lock_auth_core::{AuthContext, AuthError, Authenticator, Conversation, MessageStyle};
use secrecy::ExposeSecret;

/// A mock authenticator for testing.
///
/// Each attempt optionally emits an informational and an error message, then
/// asks for a secret with an echo-off prompt and compares the answer with the
/// configured password.
///
/// # Example
///
/// ```
/// use lock_auth_helper::backend::MockAuthenticator;
///
/// // Accepts "correctpass"
/// let mock = MockAuthenticator::with_password("correctpass");
///
/// // Fails every attempt without prompting
/// let broken = MockAuthenticator::unavailable("no such service");
/// ```
pub struct MockAuthenticator {
    /// The password that is accepted.
    password: String,
    /// Text of the echo-off prompt.
    prompt: String,
    /// Informational text sent before the prompt.
    info: Option<String>,
    /// Error text sent before the prompt.
    error_message: Option<String>,
    /// Make every verification fail without a conversation.
    unavailable: Option<String>,
    /// Make the startup probe fail.
    probe_error: Option<String>,
    /// Delay before each verification starts.
    delay: Option<Duration>,
    /// Number of times verify was called.
    call_count: Arc<AtomicUsize>,
}

impl MockAuthenticator {
    /// Create a mock that accepts the given password.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            prompt: "Password:".to_string(),
            info: None,
            error_message: None,
            unavailable: None,
            probe_error: None,
            delay: None,
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock whose mechanism cannot run at all.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            unavailable: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Use a different prompt text.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Send informational text before prompting.
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    /// Send error text before prompting.
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Make the startup probe fail.
    pub fn with_probe_error(mut self, reason: impl Into<String>) -> Self {
        self.probe_error = Some(reason.into());
        self
    }

    /// Add a delay before each verification (useful for shutdown testing).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of times verify was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get a clone of the call counter for external tracking.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.call_count)
    }
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self::with_password("mock-password")
    }
}

impl Authenticator for MockAuthenticator {
    fn probe(&self) -> Result<(), AuthError> {
        match &self.probe_error {
            Some(reason) => Err(AuthError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn verify(
        &self,
        _context: &AuthContext,
        conversation: &mut dyn Conversation,
    ) -> Result<(), AuthError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if let Some(reason) = &self.unavailable {
            return Err(AuthError::Unavailable(reason.clone()));
        }

        if let Some(info) = &self.info {
            conversation.converse(MessageStyle::TextInfo, info);
        }
        if let Some(message) = &self.error_message {
            conversation.converse(MessageStyle::ErrorMsg, message);
        }

        let answer = conversation
            .converse(MessageStyle::PromptEchoOff, &self.prompt)
            .ok_or(AuthError::Aborted)?;

        if answer.expose_secret() == self.password.as_bytes() {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lock_auth_core::PendingSecret;

    struct Answers {
        answers: Vec<&'static str>,
        seen: Vec<MessageStyle>,
    }

    impl Conversation for Answers {
        fn converse(&mut self, style: MessageStyle, _message: &str) -> Option<PendingSecret> {
            self.seen.push(style);
            if style != MessageStyle::PromptEchoOff || self.answers.is_empty() {
                return None;
            }
            Some(PendingSecret::from(self.answers.remove(0)))
        }
    }

    fn answers(answers: Vec<&'static str>) -> Answers {
        Answers {
            answers,
            seen: Vec::new(),
        }
    }

    fn context() -> AuthContext {
        AuthContext::new("alice", None)
    }

    #[test]
    fn mock_accepts_password() {
        let mock = MockAuthenticator::with_password("secret");
        let mut conv = answers(vec!["secret"]);
        assert!(mock.verify(&context(), &mut conv).is_ok());
        assert_eq!(conv.seen, vec![MessageStyle::PromptEchoOff]);
    }

    #[test]
    fn mock_rejects_wrong_password() {
        let mock = MockAuthenticator::with_password("secret");
        let mut conv = answers(vec!["guess"]);
        assert_eq!(
            mock.verify(&context(), &mut conv),
            Err(AuthError::Rejected)
        );
    }

    #[test]
    fn mock_aborts_without_answer() {
        let mock = MockAuthenticator::default();
        let mut conv = answers(vec![]);
        assert_eq!(mock.verify(&context(), &mut conv), Err(AuthError::Aborted));
    }

    #[test]
    fn mock_unavailable_skips_conversation() {
        let mock = MockAuthenticator::unavailable("broken");
        let mut conv = answers(vec!["mock-password"]);
        assert!(matches!(
            mock.verify(&context(), &mut conv),
            Err(AuthError::Unavailable(_))
        ));
        assert!(conv.seen.is_empty());
        assert!(mock.probe().is_ok());
    }

    #[test]
    fn mock_sends_info_and_error_first() {
        let mock = MockAuthenticator::with_password("pw")
            .with_info("Touch the key")
            .with_error_message("Last attempt failed");
        let mut conv = answers(vec!["pw"]);
        assert!(mock.verify(&context(), &mut conv).is_ok());
        assert_eq!(
            conv.seen,
            vec![
                MessageStyle::TextInfo,
                MessageStyle::ErrorMsg,
                MessageStyle::PromptEchoOff
            ]
        );
    }

    #[test]
    fn mock_probe_error() {
        let mock = MockAuthenticator::default().with_probe_error("no pam");
        assert!(matches!(mock.probe(), Err(AuthError::Unavailable(_))));
    }

    #[test]
    fn mock_tracks_call_count() {
        let mock = MockAuthenticator::default();
        let counter = mock.call_counter();
        assert_eq!(mock.call_count(), 0);

        let _ = mock.verify(&context(), &mut answers(vec!["a"]));
        let _ = mock.verify(&context(), &mut answers(vec!["b"]));
        assert_eq!(mock.call_count(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
