//! Privileged setup, run once before any session logic.
//!
//! The helper may be installed setuid or setgid so that PAM modules can read
//! protected databases while the stack is being set up. This module checks
//! that the PAM service is registered, then drops back to the invoking user's
//! identity and makes sure the elevated identity cannot be regained.
//!
//! When this setup fails the caller is told [`AUTH_SUCCESS`] and the process
//! exits non-zero: a lock that cannot be enforced dismisses its dialog rather
//! than leaving the caller waiting.
//!
//! [`AUTH_SUCCESS`]: lock_auth_core::protocol::AUTH_SUCCESS

use std::io::Write;
use std::path::PathBuf;

use lock_auth_core::config::PamConfig;
use lock_auth_core::{AuthError, Config, ConfigError, ProtocolError, ProtocolMessage, ProtocolWriter};
use nix::unistd::{self, Gid, Uid, User};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that make locking impossible.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The real user is root.
    #[error("running as root")]
    RunningAsRoot,

    /// No user name could be found for the real UID.
    #[error("cannot determine user name for uid {0}")]
    NoIdentity(u32),

    /// Switching to the real user or group failed.
    #[error("failed to drop privileges: {0}")]
    DropFailed(#[source] nix::Error),

    /// Root could be regained after the switch.
    #[error("privileges could be regained after dropping them")]
    RegainedPrivileges,

    /// The authentication backend cannot be used.
    #[error("locking unavailable: {0}")]
    LockingUnavailable(#[source] AuthError),

    /// The configuration file is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Real and effective IDs of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIds {
    pub ruid: Uid,
    pub euid: Uid,
    pub rgid: Gid,
    pub egid: Gid,
}

impl ProcessIds {
    /// IDs of the running process.
    pub fn current() -> Self {
        Self {
            ruid: unistd::getuid(),
            euid: unistd::geteuid(),
            rgid: unistd::getgid(),
            egid: unistd::getegid(),
        }
    }

    /// Whether the process runs with rights other than its invoker's.
    pub fn is_privileged(&self) -> bool {
        self.euid != self.ruid || self.egid != self.rgid
    }
}

/// What the privilege drop will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPlan {
    /// Already running as the invoking user.
    Keep,
    /// Switch all IDs to the invoking user's.
    SwitchTo {
        uid: Uid,
        gid: Gid,
        /// Reset supplementary groups; only possible while still root.
        clear_groups: bool,
    },
}

/// Decide how to drop privileges.
pub fn plan_privilege_drop(ids: &ProcessIds) -> Result<DropPlan, GuardError> {
    if ids.ruid.is_root() {
        return Err(GuardError::RunningAsRoot);
    }
    if !ids.is_privileged() {
        return Ok(DropPlan::Keep);
    }
    Ok(DropPlan::SwitchTo {
        uid: ids.ruid,
        gid: ids.rgid,
        clear_groups: ids.euid.is_root(),
    })
}

/// Carry out a [`DropPlan`] and verify the result.
pub fn apply_privilege_drop(plan: DropPlan) -> Result<(), GuardError> {
    let (uid, gid, clear_groups) = match plan {
        DropPlan::Keep => return Ok(()),
        DropPlan::SwitchTo {
            uid,
            gid,
            clear_groups,
        } => (uid, gid, clear_groups),
    };

    // Groups first: once the UID is dropped there is no right left to
    // change them.
    if clear_groups {
        unistd::setgroups(&[gid]).map_err(GuardError::DropFailed)?;
    }
    unistd::setresgid(gid, gid, gid).map_err(GuardError::DropFailed)?;
    unistd::setresuid(uid, uid, uid).map_err(GuardError::DropFailed)?;

    if unistd::geteuid() != uid || unistd::getegid() != gid {
        return Err(GuardError::RegainedPrivileges);
    }
    if unistd::setuid(Uid::from_raw(0)).is_ok() {
        return Err(GuardError::RegainedPrivileges);
    }

    info!(uid = uid.as_raw(), gid = gid.as_raw(), "Dropped privileges");
    Ok(())
}

/// Where the PAM service definition was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceRegistration {
    /// A per-service file in the PAM config directory.
    Service(PathBuf),
    /// Only the legacy single-file configuration exists.
    LegacyConfig(PathBuf),
    /// Neither was found.
    Missing,
}

/// Look for the PAM service definition.
pub fn check_service_registration(pam: &PamConfig, service: &str) -> ServiceRegistration {
    let service_file = pam.config_dir.join(service);
    if service_file.exists() {
        return ServiceRegistration::Service(service_file);
    }
    if pam.config_file.exists() {
        return ServiceRegistration::LegacyConfig(pam.config_file.clone());
    }
    ServiceRegistration::Missing
}

/// Result of a successful [`privileged_initialization`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeReport {
    pub registration: ServiceRegistration,
    pub plan: DropPlan,
}

/// Check the PAM service, then drop privileges.
pub fn privileged_initialization(
    config: &Config,
    ids: &ProcessIds,
) -> Result<PrivilegeReport, GuardError> {
    let service = &config.auth.service;
    let registration = check_service_registration(&config.pam, service);
    match &registration {
        ServiceRegistration::Service(path) => {
            debug!(service = %service, path = %path.display(), "PAM service registered");
        }
        ServiceRegistration::LegacyConfig(path) => {
            debug!(service = %service, path = %path.display(), "Using legacy PAM configuration");
        }
        ServiceRegistration::Missing => warn!(
            service = %service,
            dir = %config.pam.config_dir.display(),
            "PAM service is not registered, authentication may fail"
        ),
    }

    let plan = plan_privilege_drop(ids)?;
    apply_privilege_drop(plan)?;

    Ok(PrivilegeReport { registration, plan })
}

/// Name of the user to authenticate: the owner of the real UID.
///
/// Falls back to `fallback` (normally `$USER`) when the passwd lookup fails.
pub fn resolve_identity(uid: Uid, fallback: Option<String>) -> Result<String, GuardError> {
    match User::from_uid(uid) {
        Ok(Some(user)) => return Ok(user.name),
        Ok(None) => debug!(uid = uid.as_raw(), "No passwd entry for uid"),
        Err(e) => debug!(uid = uid.as_raw(), error = %e, "Passwd lookup failed"),
    }
    fallback
        .filter(|name| !name.is_empty())
        .ok_or(GuardError::NoIdentity(uid.as_raw()))
}

/// Tell the caller to dismiss its dialog when locking is impossible.
pub fn report_lock_unavailable<W: Write>(output: W) -> Result<(), ProtocolError> {
    ProtocolWriter::new(output).send(&ProtocolMessage::Success)
}
