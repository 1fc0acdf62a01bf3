//! Command-line argument dispatch.
//!
//! Parses validated CLI arguments and maps them to the action to run, such as
//! starting the web server with its full configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{self, auth, session, ARG_DSN, ARG_PORT, ARG_STATIC_DIR};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(4000);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let static_dir = matches
        .get_one::<PathBuf>(ARG_STATIC_DIR)
        .cloned()
        .unwrap_or_else(|| PathBuf::from("./ui/static"));

    let session_opts = session::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        static_dir,
        session_lifetime_seconds: session_opts.lifetime_seconds,
        session_cookie_secure: session_opts.cookie_secure,
        session_cleanup_seconds: session_opts.cleanup_seconds,
        bcrypt_cost: auth_opts.bcrypt_cost,
    }))
}
