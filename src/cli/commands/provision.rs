use crate::cli::actions::provision::{Args, NewAccount};
use crate::store::Affiliation;
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const NAME: &str = "provision";
pub const ARG_USERNAME: &str = "username";
pub const ARG_INSTITUTIONAL_EMAIL: &str = "institutional-email";
pub const ARG_DISPLAY_NAME: &str = "display-name";
pub const ARG_AFFILIATION: &str = "affiliation";

/// `portal provision`: create a pending account the owner activates later.
#[must_use]
pub fn subcommand() -> Command {
    Command::new(NAME)
        .about("Create a pending account")
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("PORTAL_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_USERNAME)
                .long(ARG_USERNAME)
                .help("Directory username (uid)")
                .required(true),
        )
        .arg(
            Arg::new(ARG_INSTITUTIONAL_EMAIL)
                .long(ARG_INSTITUTIONAL_EMAIL)
                .help("Institutional email the owner confirms on activation")
                .required(true),
        )
        .arg(
            Arg::new(ARG_DISPLAY_NAME)
                .long(ARG_DISPLAY_NAME)
                .help("Name shown on the profile")
                .required(true),
        )
        .arg(
            Arg::new(ARG_AFFILIATION)
                .long(ARG_AFFILIATION)
                .help("Account affiliation")
                .value_parser(["student", "employee"])
                .default_value("student"),
        )
}

/// # Errors
/// Returns an error if a required value is missing.
pub fn parse(matches: &ArgMatches) -> Result<Args> {
    let get = |id: &str| {
        matches
            .get_one::<String>(id)
            .map(|value| value.trim().to_string())
            .with_context(|| format!("missing required argument: --{id}"))
    };

    let affiliation = get(ARG_AFFILIATION)?;
    Ok(Args {
        dsn: get("dsn")?,
        account: NewAccount {
            username: get(ARG_USERNAME)?,
            institutional_email: get(ARG_INSTITUTIONAL_EMAIL)?,
            display_name: get(ARG_DISPLAY_NAME)?,
            affiliation: Affiliation::parse(&affiliation)
                .with_context(|| format!("unknown affiliation: {affiliation}"))?,
        },
    })
}
