use crate::email::SmtpConfig;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_SMTP_PORT: &str = "smtp-port";
pub const ARG_SMTP_USERNAME: &str = "smtp-username";
pub const ARG_SMTP_PASSWORD: &str = "smtp-password";
pub const ARG_EMAIL_FROM: &str = "email-from";

/// SMTP settings, or `None` when no relay host is configured and codes are
/// only written to the log.
///
/// # Errors
/// Returns an error if credentials are only half configured.
pub fn parse(matches: &ArgMatches) -> anyhow::Result<Option<SmtpConfig>> {
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    let Some(host) = get_non_empty(ARG_SMTP_HOST) else {
        return Ok(None);
    };

    let username = get_non_empty(ARG_SMTP_USERNAME);
    let password = get_non_empty(ARG_SMTP_PASSWORD).map(SecretString::from);
    if username.is_some() != password.is_some() {
        anyhow::bail!("--{ARG_SMTP_USERNAME} and --{ARG_SMTP_PASSWORD} must be set together");
    }

    Ok(Some(SmtpConfig {
        host,
        port: matches.get_one::<u16>(ARG_SMTP_PORT).copied().unwrap_or(587),
        username,
        password,
        from: get_non_empty(ARG_EMAIL_FROM)
            .unwrap_or_else(|| "Portal <no-reply@campus.edu>".to_string()),
    }))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host; recovery codes are only logged when unset")
                .env("PORTAL_SMTP_HOST"),
        )
        .arg(
            Arg::new(ARG_SMTP_PORT)
                .long(ARG_SMTP_PORT)
                .help("SMTP relay port (STARTTLS)")
                .env("PORTAL_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SMTP_USERNAME)
                .long(ARG_SMTP_USERNAME)
                .help("SMTP username")
                .env("PORTAL_SMTP_USERNAME"),
        )
        .arg(
            Arg::new(ARG_SMTP_PASSWORD)
                .long(ARG_SMTP_PASSWORD)
                .help("SMTP password")
                .env("PORTAL_SMTP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("Sender address for recovery emails")
                .env("PORTAL_EMAIL_FROM")
                .default_value("Portal <no-reply@campus.edu>"),
        )
}
