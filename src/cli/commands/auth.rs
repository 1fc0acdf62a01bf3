use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const ARG_BCRYPT_COST: &str = "bcrypt-cost";

#[derive(Debug)]
pub struct Options {
    pub bcrypt_cost: u32,
}

impl Options {
    /// Read credential hashing options from validated matches.
    ///
    /// # Errors
    /// Returns an error if the defaulted cost is unexpectedly missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            bcrypt_cost: matches
                .get_one::<u32>(ARG_BCRYPT_COST)
                .copied()
                .context("missing required argument: --bcrypt-cost")?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_BCRYPT_COST)
            .long(ARG_BCRYPT_COST)
            .help("bcrypt work factor used when hashing new passwords")
            .env("SNIPPETBOX_BCRYPT_COST")
            .default_value("12")
            .value_parser(clap::value_parser!(u32).range(4..=31)),
    )
}
