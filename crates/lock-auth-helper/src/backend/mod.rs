//! Credential backends.
//!
//! This module provides implementations of the [`Authenticator`] trait:
//!
//! - [`PamAuthenticator`]: the system PAM stack (with the `pam` feature)
//! - [`MockAuthenticator`]: Configurable mock for testing
//!
//! [`SystemAuthenticator`] names the backend the binary uses. Without the
//! `pam` feature it is [`Unsupported`], which makes lock initialization fail.

mod mock;
#[cfg(feature = "pam")]
mod pam;

pub use mock::MockAuthenticator;
#[cfg(feature = "pam")]
pub use pam::PamAuthenticator;

use lock_auth_core::{AuthContext, AuthError, Authenticator, Config, Conversation};
use tracing::debug;

use crate::guard::GuardError;

/// Backend used by the helper binary.
#[cfg(feature = "pam")]
pub type SystemAuthenticator = PamAuthenticator;

/// Backend used by the helper binary.
#[cfg(not(feature = "pam"))]
pub type SystemAuthenticator = Unsupported;

/// Create the binary's backend from configuration.
pub fn system_authenticator(config: &Config) -> SystemAuthenticator {
    SystemAuthenticator::new(config)
}

/// Stand-in for builds without locking support.
#[derive(Debug, Default)]
pub struct Unsupported;

impl Unsupported {
    pub fn new(_config: &Config) -> Self {
        Self
    }
}

impl Authenticator for Unsupported {
    fn probe(&self) -> Result<(), AuthError> {
        Err(AuthError::Unavailable(
            "not compiled with locking support".to_string(),
        ))
    }

    fn verify(
        &self,
        _context: &AuthContext,
        _conversation: &mut dyn Conversation,
    ) -> Result<(), AuthError> {
        self.probe()
    }
}

/// Finish setting up the backend, now that privileges are dropped.
pub fn lock_initialization<A: Authenticator + ?Sized>(authenticator: &A) -> Result<(), GuardError> {
    authenticator
        .probe()
        .map_err(GuardError::LockingUnavailable)?;
    debug!("Lock initialization complete");
    Ok(())
}
