use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

pub const ARG_SESSION_LIFETIME_SECONDS: &str = "session-lifetime-seconds";
pub const ARG_SESSION_COOKIE_SECURE: &str = "session-cookie-secure";
pub const ARG_SESSION_CLEANUP_SECONDS: &str = "session-cleanup-seconds";

#[derive(Debug)]
pub struct Options {
    pub lifetime_seconds: u64,
    pub cookie_secure: bool,
    pub cleanup_seconds: u64,
}

impl Options {
    /// Read session options from validated matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is unexpectedly missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            lifetime_seconds: matches
                .get_one::<u64>(ARG_SESSION_LIFETIME_SECONDS)
                .copied()
                .context("missing required argument: --session-lifetime-seconds")?,
            cookie_secure: matches.get_flag(ARG_SESSION_COOKIE_SECURE),
            cleanup_seconds: matches
                .get_one::<u64>(ARG_SESSION_CLEANUP_SECONDS)
                .copied()
                .context("missing required argument: --session-cleanup-seconds")?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_LIFETIME_SECONDS)
                .long(ARG_SESSION_LIFETIME_SECONDS)
                .help("Absolute session lifetime in seconds")
                .env("SNIPPETBOX_SESSION_LIFETIME_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_SECURE)
                .long(ARG_SESSION_COOKIE_SECURE)
                .help("Mark the session cookie Secure (serve over HTTPS)")
                .env("SNIPPETBOX_SESSION_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SESSION_CLEANUP_SECONDS)
                .long(ARG_SESSION_CLEANUP_SECONDS)
                .help("Interval between expired session sweeps in seconds")
                .env("SNIPPETBOX_SESSION_CLEANUP_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
