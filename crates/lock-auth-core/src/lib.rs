//! Core types and utilities for lock-auth.
//!
//! This crate holds the parts of the screen-lock authentication helper that do
//! not depend on PAM or on process setup. It is intentionally UI-agnostic to
//! allow:
//!
//! - Security audits to focus on the protocol and the secret handoff
//! - Unit tests without a PAM stack or elevated rights
//! - Different credential backends behind one trait
//!
//! # Modules
//!
//! - [`protocol`]: The line protocol (`ProtocolMessage`, `InputKind`, `ProtocolWriter`)
//! - [`secret`]: Captured input and the handoff slot (`PendingSecret`, `SecretSlot`)
//! - [`traits`]: The authentication capability (`Authenticator`, `Conversation`)
//! - [`session`]: Failure ceiling and verdict policy (`Session`, `AttemptCounter`)
//! - [`config`]: TOML configuration
//!
//! # Example
//!
//! ```
//! use lock_auth_core::protocol::{InputKind, ProtocolMessage};
//!
//! let line = ProtocolMessage::prompt("Password:").to_line();
//! assert_eq!(line, "CS_PAM_AUTH_SET_PROMPT_Password:_\n");
//!
//! assert_eq!(
//!     InputKind::decode(b"CS_PAM_AUTH_REQUEST_SUBPROCESS_EXIT"),
//!     InputKind::ExitRequest
//! );
//! ```

pub mod config;
pub mod protocol;
pub mod secret;
pub mod session;
pub mod traits;

// Re-export commonly used types at the crate root for convenience
pub use config::{Config, ConfigError};
pub use protocol::{InputKind, ProtocolError, ProtocolMessage, ProtocolWriter};
pub use secret::{CancelReason, Handoff, PendingSecret, SecretSlot};
pub use session::{AttemptCounter, Outcome, Session, Step, Verdict, DEFAULT_MAX_FAILURES};
pub use traits::{AuthContext, AuthError, Authenticator, Conversation, MessageStyle};
