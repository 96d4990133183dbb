//! PAM backend.
//!
//! Each attempt opens a fresh PAM transaction for the configured service and
//! runs `pam_authenticate`, then account management. An expired token is
//! renewed through `pam_chauthtok`, and credentials are refreshed on success.

use std::ffi::{CStr, CString};

use lock_auth_core::{
    AuthContext, AuthError, Authenticator, Config, Conversation, MessageStyle, PendingSecret,
};
use pam_client::{Context, ConversationHandler, ErrorCode, Flag};
use secrecy::ExposeSecret;
use tracing::{debug, warn};
use zeroize::Zeroize;

/// Adapts a [`Conversation`] to the callback interface PAM expects.
struct PamConversation<'a> {
    inner: &'a mut dyn Conversation,
}

impl PamConversation<'_> {
    fn relay(&mut self, style: MessageStyle, msg: &CStr) -> Option<PendingSecret> {
        self.inner.converse(style, &msg.to_string_lossy())
    }
}

/// Copy an answer into the form PAM takes, consuming (and zeroing) it.
///
/// Room for the terminator is reserved up front so `CString::new` never
/// reallocates and leaves a stray copy behind. pam-client copies the string
/// into the PAM response and drops the `CString` without scrubbing it; that
/// one copy is outside our control. An answer with an interior NUL cannot be
/// passed to PAM.
fn into_cstring(secret: PendingSecret) -> Result<CString, ErrorCode> {
    let answer = secret.expose_secret();
    let mut bytes = Vec::with_capacity(answer.len() + 1);
    bytes.extend_from_slice(answer);
    drop(secret);

    CString::new(bytes).map_err(|e| {
        e.into_vec().zeroize();
        ErrorCode::CONV_ERR
    })
}

impl ConversationHandler for PamConversation<'_> {
    fn prompt_echo_on(&mut self, msg: &CStr) -> Result<CString, ErrorCode> {
        match self.relay(MessageStyle::PromptEchoOn, msg) {
            Some(answer) => into_cstring(answer),
            None => Err(ErrorCode::CONV_ERR),
        }
    }

    fn prompt_echo_off(&mut self, msg: &CStr) -> Result<CString, ErrorCode> {
        match self.relay(MessageStyle::PromptEchoOff, msg) {
            Some(answer) => into_cstring(answer),
            None => Err(ErrorCode::CONV_ERR),
        }
    }

    fn text_info(&mut self, msg: &CStr) {
        self.relay(MessageStyle::TextInfo, msg);
    }

    fn error_msg(&mut self, msg: &CStr) {
        self.relay(MessageStyle::ErrorMsg, msg);
    }
}

/// Verifies credentials through the system PAM stack.
pub struct PamAuthenticator {
    service: String,
}

impl PamAuthenticator {
    pub fn new(config: &Config) -> Self {
        Self {
            service: config.auth.service.clone(),
        }
    }
}

impl Authenticator for PamAuthenticator {
    fn probe(&self) -> Result<(), AuthError> {
        let conversation = pam_client::conv_null::Conversation::new();
        Context::new(&self.service, None, conversation)
            .map(|_| ())
            .map_err(|e| AuthError::Unavailable(e.to_string()))
    }

    fn verify(
        &self,
        context: &AuthContext,
        conversation: &mut dyn Conversation,
    ) -> Result<(), AuthError> {
        let handler = PamConversation {
            inner: conversation,
        };
        let mut pam = Context::new(&self.service, Some(&context.user), handler)
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if let Some(display) = context.display.as_deref() {
            pam.set_tty(Some(display))
                .map_err(|e| AuthError::Unavailable(e.to_string()))?;
            if let Err(e) = pam.set_xdisplay(Some(display)) {
                debug!(error = %e, "Could not set PAM_XDISPLAY");
            }
        }

        pam.authenticate(Flag::NONE).map_err(|e| match e.code() {
            ErrorCode::CONV_ERR | ErrorCode::ABORT => AuthError::Aborted,
            _ => {
                debug!(error = %e, "pam_authenticate failed");
                AuthError::Rejected
            }
        })?;

        match pam.acct_mgmt(Flag::NONE) {
            Ok(()) => {}
            Err(e) if e.code() == ErrorCode::NEW_AUTHTOK_REQD => {
                debug!("Authentication token expired, requesting a new one");
                pam.chauthtok(Flag::CHANGE_EXPIRED_AUTHTOK)
                    .map_err(|e| AuthError::AccountInvalid(e.to_string()))?;
            }
            Err(e) => return Err(AuthError::AccountInvalid(e.to_string())),
        }

        if let Err(e) = pam.reinitialize_credentials(Flag::NONE) {
            warn!(error = %e, "Could not refresh credentials");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers every echo-off prompt with a fixed line and records messages.
    struct Scripted {
        answer: Option<&'static [u8]>,
        seen: Vec<(MessageStyle, String)>,
    }

    impl Conversation for Scripted {
        fn converse(&mut self, style: MessageStyle, message: &str) -> Option<PendingSecret> {
            self.seen.push((style, message.to_string()));
            match style {
                MessageStyle::PromptEchoOff => self
                    .answer
                    .map(|a| PendingSecret::from_buffer(&mut a.to_vec())),
                _ => None,
            }
        }
    }

    fn cstr(bytes: &'static [u8]) -> &'static CStr {
        CStr::from_bytes_with_nul(bytes).unwrap()
    }

    fn scripted(answer: Option<&'static [u8]>) -> Scripted {
        Scripted {
            answer,
            seen: Vec::new(),
        }
    }

    #[test]
    fn echo_off_prompt_is_answered() {
        let mut inner = scripted(Some(b"hunter2"));
        let mut conv = PamConversation { inner: &mut inner };

        let answer = conv.prompt_echo_off(cstr(b"Password: \0")).unwrap();
        assert_eq!(answer.as_bytes(), b"hunter2");
        assert_eq!(
            inner.seen,
            vec![(MessageStyle::PromptEchoOff, "Password: ".to_string())]
        );
    }

    #[test]
    fn missing_answer_is_a_conversation_error() {
        let mut inner = scripted(None);
        let mut conv = PamConversation { inner: &mut inner };
        assert!(matches!(conv.prompt_echo_off(cstr(b"Password: \0")), Err(ErrorCode::CONV_ERR)));
        assert!(matches!(conv.prompt_echo_on(cstr(b"Login: \0")), Err(ErrorCode::CONV_ERR)));
    }

    #[test]
    fn interior_nul_is_rejected() {
        let mut inner = scripted(Some(b"pass\0word"));
        let mut conv = PamConversation { inner: &mut inner };
        assert!(matches!(conv.prompt_echo_off(cstr(b"Password: \0")), Err(ErrorCode::CONV_ERR)));
    }

    #[test]
    fn messages_are_relayed_with_their_style() {
        let mut inner = scripted(None);
        let mut conv = PamConversation { inner: &mut inner };
        conv.text_info(cstr(b"Touch the key\0"));
        conv.error_msg(cstr(b"Account locked\0"));

        assert_eq!(
            inner.seen,
            vec![
                (MessageStyle::TextInfo, "Touch the key".to_string()),
                (MessageStyle::ErrorMsg, "Account locked".to_string()),
            ]
        );
    }

    #[test]
    fn cstring_conversion_keeps_the_answer_intact() {
        let answer = into_cstring(PendingSecret::from("correct horse")).unwrap();
        assert_eq!(answer.as_bytes(), b"correct horse");
    }

    #[test]
    fn authenticator_uses_configured_service() {
        let mut config = Config::default();
        config.auth.service = "screensaver".to_string();
        assert_eq!(PamAuthenticator::new(&config).service, "screensaver");
    }
}
