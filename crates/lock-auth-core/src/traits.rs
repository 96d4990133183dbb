//! Trait definitions for the authentication capability.
//!
//! The helper never talks to a credential library directly. It hands an
//! [`Authenticator`] a [`Conversation`] and receives a verdict. The
//! authenticator calls back into the conversation zero or more times, the way
//! PAM calls an application's conversation function:
//!
//! - PAM in production (behind the helper's `pam` feature)
//! - A scripted mock for testing
//!
//! The retry policy and the wire protocol are independent of which
//! authenticator answers.

use std::fmt;

use crate::secret::PendingSecret;

/// Error type for a single verification attempt.
///
/// Every variant counts as one failed attempt. Callers should not try to
/// tell them apart in anything user-visible.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The credential was rejected.
    #[error("credential rejected")]
    Rejected,

    /// The conversation returned no answer (cancelled or input closed).
    #[error("conversation aborted")]
    Aborted,

    /// The authentication mechanism could not run at all.
    #[error("authentication unavailable: {0}")]
    Unavailable(String),

    /// Authentication passed but the account is not usable.
    #[error("account invalid: {0}")]
    AccountInvalid(String),
}

/// Kind of request the authentication mechanism makes of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStyle {
    /// Ask for a secret without echoing it.
    PromptEchoOff,
    /// Ask for visible input.
    PromptEchoOn,
    /// Error text.
    ErrorMsg,
    /// Informational text.
    TextInfo,
}

impl fmt::Display for MessageStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageStyle::PromptEchoOff => write!(f, "prompt_echo_off"),
            MessageStyle::PromptEchoOn => write!(f, "prompt_echo_on"),
            MessageStyle::ErrorMsg => write!(f, "error_msg"),
            MessageStyle::TextInfo => write!(f, "text_info"),
        }
    }
}

/// Who is being authenticated, and on which display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Login name of the user.
    pub user: String,
    /// Display or terminal the session belongs to (`$DISPLAY`).
    pub display: Option<String>,
}

impl AuthContext {
    /// Create a context for `user` on an optional display.
    pub fn new(user: impl Into<String>, display: Option<String>) -> Self {
        Self {
            user: user.into(),
            display,
        }
    }
}

/// The application side of an authentication conversation.
///
/// Returning `None` means "no answer" and makes the mechanism abandon the
/// current attempt.
pub trait Conversation {
    /// Handle one message from the authentication mechanism.
    fn converse(&mut self, style: MessageStyle, message: &str) -> Option<PendingSecret>;
}

/// Trait for credential verification backends.
///
/// `verify` is a blocking call. It runs on a worker thread and may call back
/// into `conversation` any number of times before returning.
pub trait Authenticator: Send + Sync {
    /// Check that the backend can be used at all. Called once at startup,
    /// after privileges are dropped.
    fn probe(&self) -> Result<(), AuthError> {
        Ok(())
    }

    /// Run one verification attempt for `context`.
    fn verify(
        &self,
        context: &AuthContext,
        conversation: &mut dyn Conversation,
    ) -> Result<(), AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<(MessageStyle, String)>);

    impl Conversation for Scripted {
        fn converse(&mut self, style: MessageStyle, message: &str) -> Option<PendingSecret> {
            self.0.push((style, message.to_string()));
            match style {
                MessageStyle::PromptEchoOff => Some(PendingSecret::from("pw")),
                _ => None,
            }
        }
    }

    struct Fixed;

    impl Authenticator for Fixed {
        fn verify(
            &self,
            _context: &AuthContext,
            conversation: &mut dyn Conversation,
        ) -> Result<(), AuthError> {
            conversation.converse(MessageStyle::TextInfo, "hello");
            match conversation.converse(MessageStyle::PromptEchoOff, "Password:") {
                Some(_) => Ok(()),
                None => Err(AuthError::Aborted),
            }
        }
    }

    #[test]
    fn authenticator_drives_conversation() {
        let mut conversation = Scripted(Vec::new());
        let context = AuthContext::new("alice", Some(":0".to_string()));

        assert!(Fixed.probe().is_ok());
        assert!(Fixed.verify(&context, &mut conversation).is_ok());
        assert_eq!(
            conversation.0,
            vec![
                (MessageStyle::TextInfo, "hello".to_string()),
                (MessageStyle::PromptEchoOff, "Password:".to_string()),
            ]
        );
    }

    #[test]
    fn message_style_display() {
        assert_eq!(MessageStyle::PromptEchoOff.to_string(), "prompt_echo_off");
        assert_eq!(MessageStyle::PromptEchoOn.to_string(), "prompt_echo_on");
        assert_eq!(MessageStyle::ErrorMsg.to_string(), "error_msg");
        assert_eq!(MessageStyle::TextInfo.to_string(), "text_info");
    }

    #[test]
    fn auth_error_display() {
        assert_eq!(AuthError::Rejected.to_string(), "credential rejected");
        assert_eq!(
            AuthError::Unavailable("no service".to_string()).to_string(),
            "authentication unavailable: no service"
        );
    }
}
