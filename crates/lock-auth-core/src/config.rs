//! Configuration types and loading for the authentication helper.
//!
//! Configuration is read from `/etc/lock-auth/helper.toml`. An unprivileged
//! run may instead point at a file with `--config`, or use the per-user file
//! `~/.config/lock-auth/helper.toml`.
//!
//! # Error Handling
//!
//! - If the config file doesn't exist, default values are returned.
//! - If the config file exists but is invalid, an error is returned (fail fast).
//!
//! # Example Configuration
//!
//! ```toml
//! [auth]
//! service = "lock-auth"       # /etc/pam.d/<service>
//! max_failures = 5
//!
//! [pam]
//! config_dir = "/etc/pam.d"
//! config_file = "/etc/pam.conf"
//!
//! [input]
//! max_line_len = 4096
//!
//! [shutdown]
//! grace_secs = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::session::DEFAULT_MAX_FAILURES;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/lock-auth/helper.toml";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Where the PAM stack keeps its service files.
    pub pam: PamConfig,
    /// Input stream limits.
    pub input: InputConfig,
    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    /// PAM service name (default: "lock-auth").
    pub service: String,
    /// Rejected attempts before the session is cancelled (default: 5).
    pub max_failures: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service: "lock-auth".to_string(),
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PamConfig {
    /// Directory of per-service files (default: /etc/pam.d).
    pub config_dir: PathBuf,
    /// Legacy single-file configuration (default: /etc/pam.conf).
    pub config_file: PathBuf,
}

impl Default for PamConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/pam.d"),
            config_file: PathBuf::from("/etc/pam.conf"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputConfig {
    /// Longest accepted input line in bytes; the rest is discarded.
    pub max_line_len: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { max_line_len: 4096 }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds to wait for outstanding work on exit (default: 5).
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 5 }
    }
}

impl Config {
    /// The system configuration file.
    pub fn system_path() -> PathBuf {
        PathBuf::from(SYSTEM_CONFIG_PATH)
    }

    /// The per-user configuration file, `~/.config/lock-auth/helper.toml`.
    ///
    /// Returns `None` if the config directory cannot be determined.
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("lock-auth").join("helper.toml"))
    }

    /// Pick the file to load.
    ///
    /// A privileged process only trusts the system file. Otherwise an
    /// explicit path wins, then an existing per-user file.
    pub fn resolve_path(explicit: Option<&Path>, privileged: bool) -> PathBuf {
        if privileged {
            if explicit.is_some() {
                debug!("Ignoring caller-supplied config path in privileged mode");
            }
            return Self::system_path();
        }
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match Self::user_path() {
            Some(path) if path.exists() => path,
            _ => Self::system_path(),
        }
    }

    /// Load configuration for this process.
    ///
    /// - Returns `Ok(Config::default())` if the chosen file doesn't exist.
    /// - Returns `Err` if the file exists but cannot be read, parsed or
    ///   validated.
    pub fn load(explicit: Option<&Path>, privileged: bool) -> Result<Self, ConfigError> {
        let path = Self::resolve_path(explicit, privileged);
        if path.exists() {
            debug!(path = %path.display(), "Loading configuration");
            Self::load_from(&path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that TOML types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.max_failures == 0 {
            return Err(ConfigError::Invalid(
                "auth.max_failures must be at least 1".to_string(),
            ));
        }
        if self.auth.service.is_empty() || self.auth.service.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "auth.service is not a valid service name: {:?}",
                self.auth.service
            )));
        }
        if self.input.max_line_len == 0 {
            return Err(ConfigError::Invalid(
                "input.max_line_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Shutdown grace period.
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn default_config_values() {
        let config = Config::default();

        assert_eq!(config.auth.service, "lock-auth");
        assert_eq!(config.auth.max_failures, 5);
        assert_eq!(config.pam.config_dir, PathBuf::from("/etc/pam.d"));
        assert_eq!(config.pam.config_file, PathBuf::from("/etc/pam.conf"));
        assert_eq!(config.input.max_line_len, 4096);
        assert_eq!(config.grace(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_valid_config() {
        let file = write_config(
            r#"
[auth]
service = "cinnamon-screensaver"
max_failures = 3

[pam]
config_dir = "/usr/lib/pam.d"

[input]
max_line_len = 512

[shutdown]
grace_secs = 1
"#,
        );

        let config = Config::load_from(file.path()).expect("Should parse");

        assert_eq!(config.auth.service, "cinnamon-screensaver");
        assert_eq!(config.auth.max_failures, 3);
        assert_eq!(config.pam.config_dir, PathBuf::from("/usr/lib/pam.d"));
        // Not set, keeps its default
        assert_eq!(config.pam.config_file, PathBuf::from("/etc/pam.conf"));
        assert_eq!(config.input.max_line_len, 512);
        assert_eq!(config.grace(), Duration::from_secs(1));
    }

    #[test]
    fn load_empty_file_uses_defaults() {
        let file = write_config("");
        let config = Config::load_from(file.path()).expect("Should parse");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let file = write_config("[auth\nservice = ");
        let result = Config::load_from(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_wrong_type_returns_error() {
        let file = write_config("[auth]\nmax_failures = \"five\"");
        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_max_failures_is_rejected() {
        let file = write_config("[auth]\nmax_failures = 0");
        let result = Config::load_from(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn service_name_with_path_separator_is_rejected() {
        let file = write_config("[auth]\nservice = \"../shadow\"");
        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn zero_line_length_is_rejected() {
        let file = write_config("[input]\nmax_line_len = 0");
        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn load_missing_explicit_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let config = Config::load(Some(&missing), false).expect("Should return defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_explicit_file_when_unprivileged() {
        let file = write_config("[auth]\nmax_failures = 2");
        let config = Config::load(Some(file.path()), false).expect("Should parse");
        assert_eq!(config.auth.max_failures, 2);
    }

    #[test]
    fn privileged_run_ignores_explicit_path() {
        let file = write_config("[auth]\nmax_failures = 2");
        assert_eq!(
            Config::resolve_path(Some(file.path()), true),
            Config::system_path()
        );
        assert_eq!(
            Config::resolve_path(Some(file.path()), false),
            file.path().to_path_buf()
        );
    }
}
