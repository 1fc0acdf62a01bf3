use crate::{
    cli::telemetry,
    snippetbox::{self, session::SessionConfig, ServerConfig},
};
use anyhow::Result;
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub static_dir: PathBuf,
    pub session_lifetime_seconds: u64,
    pub session_cookie_secure: bool,
    pub session_cleanup_seconds: u64,
    pub bcrypt_cost: u32,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, templates fail to compile, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let session_config = SessionConfig::new()
        .with_lifetime(Duration::from_secs(args.session_lifetime_seconds))
        .with_cookie_secure(args.session_cookie_secure);

    let config = ServerConfig::new(args.static_dir)
        .with_bcrypt_cost(args.bcrypt_cost)
        .with_session(session_config)
        .with_session_cleanup_interval(Duration::from_secs(args.session_cleanup_seconds));

    let result = snippetbox::new(args.port, &args.dsn, config).await;

    telemetry::shutdown_tracer();

    result
}
