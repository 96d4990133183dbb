//! Line protocol spoken between the lock screen and the helper.
//!
//! Every message is a single ASCII line terminated by `\n`. The helper writes
//! to its standard output and reads from its standard input:
//!
//! | Direction       | Line                                  |
//! |-----------------|---------------------------------------|
//! | helper → caller | `CS_PAM_AUTH_FAILURE`                 |
//! | helper → caller | `CS_PAM_AUTH_SUCCESS`                 |
//! | helper → caller | `CS_PAM_AUTH_CANCELLED`               |
//! | helper → caller | `CS_PAM_AUTH_BUSY_TRUE`               |
//! | helper → caller | `CS_PAM_AUTH_BUSY_FALSE`              |
//! | helper → caller | `CS_PAM_AUTH_SET_PROMPT_<text>_`      |
//! | helper → caller | `CS_PAM_AUTH_SET_INFO_<text>_`        |
//! | caller → helper | `CS_PAM_AUTH_REQUEST_SUBPROCESS_EXIT` |
//! | caller → helper | anything else: the secret             |
//!
//! Input decoding recognises a single control string. Every other line is a
//! secret, however protocol-like it looks.

use std::fmt;
use std::io::Write;

use thiserror::Error;

/// Last attempt was rejected; another attempt follows.
pub const AUTH_FAILURE: &str = "CS_PAM_AUTH_FAILURE";
/// Authentication succeeded; the helper exits.
pub const AUTH_SUCCESS: &str = "CS_PAM_AUTH_SUCCESS";
/// Attempts exhausted or cancellation observed; the helper exits.
pub const AUTH_CANCELLED: &str = "CS_PAM_AUTH_CANCELLED";
/// Verification in progress, do not send input.
pub const AUTH_BUSY_TRUE: &str = "CS_PAM_AUTH_BUSY_TRUE";
/// Ready for the next secret.
pub const AUTH_BUSY_FALSE: &str = "CS_PAM_AUTH_BUSY_FALSE";
/// Prefix of a prompt line. The text is followed by a `_` terminator.
pub const AUTH_SET_PROMPT: &str = "CS_PAM_AUTH_SET_PROMPT_";
/// Prefix of an informational line. The text is followed by a `_` terminator.
pub const AUTH_SET_INFO: &str = "CS_PAM_AUTH_SET_INFO_";
/// Control string the caller sends to cancel the session.
pub const EXIT_REQUEST: &str = "CS_PAM_AUTH_REQUEST_SUBPROCESS_EXIT";

const TEXT_TERMINATOR: char = '_';

/// Errors that can occur while framing or writing protocol lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to write to the caller.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line did not match any known message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// An outbound message from the helper to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// The last credential was rejected.
    Failure,
    /// The user is authenticated.
    Success,
    /// Out of attempts, or cancellation was requested.
    Cancelled,
    /// Busy state of the verification.
    Busy(bool),
    /// Text to display as the password prompt.
    Prompt(String),
    /// Informational text from the authentication stack.
    Info(String),
}

impl ProtocolMessage {
    /// Create a prompt message, flattening any line breaks in `text`.
    pub fn prompt(text: impl AsRef<str>) -> Self {
        ProtocolMessage::Prompt(flatten(text.as_ref()))
    }

    /// Create an informational message, flattening any line breaks in `text`.
    pub fn info(text: impl AsRef<str>) -> Self {
        ProtocolMessage::Info(flatten(text.as_ref()))
    }

    /// Encode as a complete wire line, including the trailing newline.
    pub fn to_line(&self) -> String {
        let mut line = self.to_string();
        line.push('\n');
        line
    }

    /// Parse a line received from the helper (newline optional).
    ///
    /// This is the caller's half of the protocol; the helper never parses its
    /// own output but tests and diagnostic tools do.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        match line {
            AUTH_FAILURE => return Ok(ProtocolMessage::Failure),
            AUTH_SUCCESS => return Ok(ProtocolMessage::Success),
            AUTH_CANCELLED => return Ok(ProtocolMessage::Cancelled),
            AUTH_BUSY_TRUE => return Ok(ProtocolMessage::Busy(true)),
            AUTH_BUSY_FALSE => return Ok(ProtocolMessage::Busy(false)),
            _ => {}
        }

        if let Some(text) = framed_text(line, AUTH_SET_PROMPT) {
            return Ok(ProtocolMessage::Prompt(text.to_string()));
        }
        if let Some(text) = framed_text(line, AUTH_SET_INFO) {
            return Ok(ProtocolMessage::Info(text.to_string()));
        }

        Err(ProtocolError::InvalidMessage(line.to_string()))
    }

    /// Whether the helper exits after sending this message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolMessage::Success | ProtocolMessage::Cancelled)
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMessage::Failure => f.write_str(AUTH_FAILURE),
            ProtocolMessage::Success => f.write_str(AUTH_SUCCESS),
            ProtocolMessage::Cancelled => f.write_str(AUTH_CANCELLED),
            ProtocolMessage::Busy(true) => f.write_str(AUTH_BUSY_TRUE),
            ProtocolMessage::Busy(false) => f.write_str(AUTH_BUSY_FALSE),
            ProtocolMessage::Prompt(text) => {
                write!(f, "{}{}{}", AUTH_SET_PROMPT, text, TEXT_TERMINATOR)
            }
            ProtocolMessage::Info(text) => write!(f, "{}{}{}", AUTH_SET_INFO, text, TEXT_TERMINATOR),
        }
    }
}

/// Classification of a line received from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// The caller asks the helper to cancel and exit.
    ExitRequest,
    /// The line is the answer to the outstanding prompt.
    Secret,
}

impl InputKind {
    /// Decode a caller line. A line *containing* the exit marker anywhere is
    /// an exit request; everything else is a secret.
    pub fn decode(line: &[u8]) -> Self {
        let marker = EXIT_REQUEST.as_bytes();
        if line.windows(marker.len()).any(|window| window == marker) {
            InputKind::ExitRequest
        } else {
            InputKind::Secret
        }
    }
}

/// Writes protocol messages, one flushed line at a time.
pub struct ProtocolWriter<W: Write> {
    inner: W,
}

impl<W: Write> ProtocolWriter<W> {
    /// Wrap an output stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a message as a single line and flush it.
    ///
    /// The line is composed in full before the write so the caller never
    /// observes a partial message.
    pub fn send(&mut self, message: &ProtocolMessage) -> Result<(), ProtocolError> {
        let line = message.to_line();
        self.inner.write_all(line.as_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn flatten(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn framed_text<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix(TEXT_TERMINATOR)
}
