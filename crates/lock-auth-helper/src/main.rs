//! lock-auth-helper - Main entry point.
//!
//! Spawned by the lock screen with stdin and stdout connected to pipes.
//! Standard output carries only the line protocol; all logging goes to
//! standard error (or the journal).
//!
//! # Startup
//!
//! 1. Load configuration (a setuid/setgid run only reads the system file)
//! 2. Check the PAM service and drop privileges
//! 3. Resolve the user and probe the authentication backend
//!
//! If any step fails the helper writes `CS_PAM_AUTH_SUCCESS` and exits with
//! status 1, so the caller dismisses a lock it cannot enforce.

use std::fs::File;
use std::io;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use lock_auth_core::{AuthContext, Config, Outcome};
use lock_auth_helper::guard::resolve_identity;
use lock_auth_helper::{
    lock_initialization, privileged_initialization, report_lock_unavailable,
    system_authenticator, GuardError, Helper, ProcessIds, SystemAuthenticator,
};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Authentication helper for the screen locker.
#[derive(Parser)]
#[command(name = "lock-auth-helper")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Show debugging output
    #[arg(long)]
    debug: bool,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,

    /// Path to config file, ignored when running setuid/setgid
    /// [default: /etc/lock-auth/helper.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Display the session belongs to [default: $DISPLAY]
    #[arg(long, value_name = "DISPLAY")]
    display: Option<String>,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match (self.debug, self.verbose) {
            (_, v) if v >= 2 => "trace",
            (true, _) | (_, 1) => "debug",
            _ => "warn",
        }
    }
}

fn setup_logging(level: &str) {
    // Use RUST_LOG=debug for verbose output, or CLI flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Check if running under systemd (JOURNAL_STREAM is set when stdout/stderr go to journal)
    if std::env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(journald_layer)
                .with(filter)
                .init();
            return;
        }
    }

    // Stdout is the protocol channel, so the fmt layer must write to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Everything needed to run a session, set up while privileged.
struct Prepared {
    config: Config,
    context: AuthContext,
    authenticator: SystemAuthenticator,
}

fn prepare(cli: &Cli, ids: &ProcessIds) -> Result<Prepared, GuardError> {
    let config = Config::load(cli.config.as_deref(), ids.is_privileged())?;

    let report = privileged_initialization(&config, ids)?;
    debug!(plan = ?report.plan, registration = ?report.registration, "Privileged initialization complete");

    let user = resolve_identity(ids.ruid, std::env::var("USER").ok())?;
    let display_name = cli
        .display
        .clone()
        .or_else(|| std::env::var("DISPLAY").ok())
        .filter(|d| !d.is_empty());

    let authenticator = system_authenticator(&config);
    lock_initialization(&authenticator)?;

    info!(user = %user, display = ?display_name, service = %config.auth.service, "Ready to authenticate");
    Ok(Prepared {
        config,
        context: AuthContext::new(user, display_name),
        authenticator,
    })
}

/// Dismiss the caller's dialog when locking cannot be enforced.
fn fail_open(err: &GuardError) -> ExitCode {
    warn!(error = %err, "Screen locking disabled");
    if let Err(e) = report_lock_unavailable(io::stdout()) {
        error!(error = %e, "Failed to report lock failure");
    }
    ExitCode::from(1)
}

fn serve(prepared: Prepared) -> Result<Outcome> {
    let Prepared {
        config,
        context,
        authenticator,
    } = prepared;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start runtime")?;

    // An unbuffered handle, so polling the descriptor sees every pending byte
    let input = io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .map(File::from)
        .context("Failed to duplicate stdin")?;

    let grace = config.grace();
    let helper = Helper::new(authenticator, context, &config);
    let result = runtime.block_on(helper.run(input, io::stdout()));

    // A verification call that never returned must not keep the process alive
    runtime.shutdown_timeout(grace);

    result.context("Failed to write protocol output")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.log_level());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting lock-auth-helper"
    );

    let ids = ProcessIds::current();
    let prepared = match prepare(&cli, &ids) {
        Ok(prepared) => prepared,
        Err(e) => return fail_open(&e),
    };

    match serve(prepared) {
        Ok(outcome) => {
            debug!(outcome = %outcome, "Exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Helper failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_log_levels() {
        let level = |args: &[&str]| {
            let mut argv = vec!["lock-auth-helper"];
            argv.extend_from_slice(args);
            Cli::parse_from(argv).log_level()
        };

        assert_eq!(level(&[]), "warn");
        assert_eq!(level(&["--debug"]), "debug");
        assert_eq!(level(&["-v"]), "debug");
        assert_eq!(level(&["-vv"]), "trace");
        assert_eq!(level(&["--debug", "-q"]), "error");
    }

    #[test]
    fn cli_accepts_display_and_config() {
        let cli = Cli::parse_from([
            "lock-auth-helper",
            "--display",
            ":1",
            "--config",
            "/tmp/helper.toml",
        ]);
        assert_eq!(cli.display.as_deref(), Some(":1"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/helper.toml")));
    }

    #[test]
    fn cli_rejects_unknown_options() {
        assert!(Cli::try_parse_from(["lock-auth-helper", "--bogus"]).is_err());
    }
}
