use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

// Index is the verbosity count `-v` would produce.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accept either a count (`0..=4`) or a level name for `SNIPPETBOX_LOG_LEVEL`.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> Result<u8, String> {
        if let Ok(count) = level.parse::<u8>() {
            return if usize::from(count) < LEVEL_NAMES.len() {
                Ok(count)
            } else {
                Err(format!("log level must be 0-{}", LEVEL_NAMES.len() - 1))
            };
        }

        let level = level.to_lowercase();
        LEVEL_NAMES
            .iter()
            .position(|name| *name == level)
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| format!("invalid log level '{level}'"))
    })
}

/// Tracing level for a verbosity count; `None` keeps the default (ERROR).
#[must_use]
pub const fn level_from_count(count: u8) -> Option<Level> {
    match count {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

#[must_use]
pub fn level(matches: &ArgMatches) -> Option<Level> {
    level_from_count(matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("SNIPPETBOX_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
