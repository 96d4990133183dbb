//! The conversation handler and a single verification attempt.
//!
//! [`HelperConversation`] is what the credential backend talks to while an
//! attempt runs on a blocking worker thread. It never writes to the caller
//! itself: protocol lines go over a channel to the dispatch loop, which is the
//! only writer.

use std::sync::Arc;

use lock_auth_core::{
    AuthContext, Authenticator, CancelReason, Conversation, Handoff, InputKind, MessageStyle,
    PendingSecret, ProtocolMessage, SecretSlot, Verdict,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Relays conversation requests to the caller and answers them from the
/// shared secret slot.
pub struct HelperConversation {
    slot: Arc<SecretSlot>,
    events: mpsc::UnboundedSender<ProtocolMessage>,
}

impl HelperConversation {
    pub fn new(slot: Arc<SecretSlot>, events: mpsc::UnboundedSender<ProtocolMessage>) -> Self {
        Self { slot, events }
    }

    fn emit(&self, message: ProtocolMessage) {
        // A closed channel means the dispatch loop has given up on this
        // attempt; nothing is listening any more.
        if self.events.send(message).is_err() {
            trace!("Protocol channel closed, message dropped");
        }
    }

    fn request_secret(&mut self, message: &str) -> Option<PendingSecret> {
        self.emit(ProtocolMessage::prompt(message));
        self.emit(ProtocolMessage::Busy(false));

        match self.slot.take() {
            Handoff::Secret(secret) => match secret.kind() {
                InputKind::ExitRequest => {
                    info!("Exit requested by caller");
                    self.slot.cancel(CancelReason::ExitRequested);
                    None
                }
                InputKind::Secret => Some(secret),
            },
            Handoff::Cancelled(reason) => {
                debug!(reason = %reason, "Prompt abandoned, session cancelled");
                None
            }
        }
    }
}

impl Conversation for HelperConversation {
    fn converse(&mut self, style: MessageStyle, message: &str) -> Option<PendingSecret> {
        debug!(style = %style, text = %message, "Conversation message");

        let response = match style {
            MessageStyle::PromptEchoOff => self.request_secret(message),
            MessageStyle::TextInfo => {
                if !message.is_empty() {
                    self.emit(ProtocolMessage::info(message));
                }
                None
            }
            // Echoed prompts are not part of this flow, and error text is
            // only reported through the final verdict.
            MessageStyle::PromptEchoOn | MessageStyle::ErrorMsg => None,
        };

        if response.is_some() {
            self.emit(ProtocolMessage::Busy(true));
        } else {
            trace!(style = %style, "No response");
        }
        response
    }
}

/// Run one verification attempt to completion.
pub fn run_attempt<A: Authenticator + ?Sized>(
    authenticator: &A,
    context: &AuthContext,
    conversation: &mut dyn Conversation,
) -> Verdict {
    debug!(user = %context.user, "Starting verification");
    let verdict = Verdict::from(authenticator.verify(context, conversation));
    match &verdict {
        Verdict::Accepted => debug!("Verify user returned success"),
        Verdict::Rejected(e) => debug!(error = %e, "Verify user returned failure"),
    }
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::thread;

    fn conversation() -> (
        HelperConversation,
        Arc<SecretSlot>,
        mpsc::UnboundedReceiver<ProtocolMessage>,
    ) {
        let slot = Arc::new(SecretSlot::new());
        let (tx, rx) = mpsc::unbounded_channel();
        (HelperConversation::new(Arc::clone(&slot), tx), slot, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProtocolMessage>) -> Vec<ProtocolMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn echo_off_prompts_then_returns_secret() {
        let (mut conv, slot, mut rx) = conversation();
        slot.publish(PendingSecret::from("hunter2"));

        let answer = conv.converse(MessageStyle::PromptEchoOff, "Password:").unwrap();
        assert_eq!(answer.expose_secret(), b"hunter2");
        assert_eq!(
            drain(&mut rx),
            vec![
                ProtocolMessage::Prompt("Password:".to_string()),
                ProtocolMessage::Busy(false),
                ProtocolMessage::Busy(true),
            ]
        );
        assert!(!slot.has_pending());
    }

    #[test]
    fn echo_off_waits_for_input() {
        let (mut conv, slot, mut rx) = conversation();
        let producer = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(50));
            producer.publish(PendingSecret::from("late"))
        });

        let answer = conv.converse(MessageStyle::PromptEchoOff, "Password:").unwrap();
        assert_eq!(answer.expose_secret(), b"late");
        assert!(handle.join().unwrap());
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[test]
    fn exit_request_cancels_without_busy() {
        let (mut conv, slot, mut rx) = conversation();
        slot.publish(PendingSecret::from("CS_PAM_AUTH_REQUEST_SUBPROCESS_EXIT"));

        assert!(conv.converse(MessageStyle::PromptEchoOff, "Password:").is_none());
        assert_eq!(slot.cancel_reason(), Some(CancelReason::ExitRequested));
        assert_eq!(
            drain(&mut rx),
            vec![
                ProtocolMessage::Prompt("Password:".to_string()),
                ProtocolMessage::Busy(false),
            ]
        );
    }

    #[test]
    fn cancelled_session_returns_no_answer() {
        let (mut conv, slot, _rx) = conversation();
        slot.cancel(CancelReason::InputClosed);
        assert!(conv.converse(MessageStyle::PromptEchoOff, "Password:").is_none());
    }

    #[test]
    fn info_is_relayed_without_consuming_input() {
        let (mut conv, slot, mut rx) = conversation();
        slot.publish(PendingSecret::from("kept"));

        assert!(conv.converse(MessageStyle::TextInfo, "Swipe\nfinger").is_none());
        assert!(conv.converse(MessageStyle::TextInfo, "").is_none());
        assert_eq!(
            drain(&mut rx),
            vec![ProtocolMessage::Info("Swipe finger".to_string())]
        );
        assert!(slot.has_pending());
    }

    #[test]
    fn echo_on_and_error_messages_are_inert() {
        let (mut conv, slot, mut rx) = conversation();
        slot.publish(PendingSecret::from("kept"));

        assert!(conv.converse(MessageStyle::PromptEchoOn, "Login:").is_none());
        assert!(conv.converse(MessageStyle::ErrorMsg, "Account locked").is_none());
        assert!(drain(&mut rx).is_empty());
        assert!(slot.has_pending());
    }

    #[test]
    fn closed_channel_does_not_block_the_backend() {
        let (mut conv, slot, rx) = conversation();
        drop(rx);
        slot.publish(PendingSecret::from("pw"));
        assert!(conv.converse(MessageStyle::PromptEchoOff, "Password:").is_some());
    }
}
