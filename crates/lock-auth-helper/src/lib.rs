//! Privilege-separated authentication helper for screen lockers.
//!
//! The lock screen spawns this helper with its standard streams connected to
//! pipes and talks to it in the line protocol of
//! [`lock_auth_core::protocol`]. The helper asks PAM to verify the invoking
//! user, relaying prompts out and passwords in, and reports the verdict.
//!
//! - [`guard`]: privileged setup and the fail-open report
//! - [`monitor`]: the stdin reader thread
//! - [`driver`]: the conversation handler for one attempt
//! - [`dispatch`]: the loop that runs attempts and writes the protocol
//! - [`backend`]: PAM and mock authenticators

pub mod backend;
pub mod dispatch;
pub mod driver;
pub mod guard;
pub mod monitor;

// Re-export main components
pub use backend::{lock_initialization, system_authenticator, MockAuthenticator, SystemAuthenticator};
pub use dispatch::{Helper, HelperOptions};
pub use guard::{privileged_initialization, report_lock_unavailable, GuardError, ProcessIds};
pub use monitor::StdinMonitor;
