use crate::directory::LdapConfig;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_LDAP_URL: &str = "ldap-url";
pub const ARG_LDAP_BIND_DN: &str = "ldap-bind-dn";
pub const ARG_LDAP_BIND_PASSWORD: &str = "ldap-bind-password";
pub const ARG_LDAP_USER_BASE_DN: &str = "ldap-user-base-dn";
pub const ARG_LDAP_TIMEOUT_SECONDS: &str = "ldap-timeout-seconds";

/// Parse the directory connection settings.
///
/// # Errors
/// Returns an error if a required argument is missing or empty.
pub fn parse(matches: &ArgMatches) -> anyhow::Result<LdapConfig> {
    let read_required = |id: &str| -> anyhow::Result<String> {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
    };

    let timeout = matches
        .get_one::<u64>(ARG_LDAP_TIMEOUT_SECONDS)
        .copied()
        .unwrap_or(5);

    Ok(LdapConfig {
        url: read_required(ARG_LDAP_URL)?,
        bind_dn: read_required(ARG_LDAP_BIND_DN)?,
        bind_password: SecretString::from(read_required(ARG_LDAP_BIND_PASSWORD)?),
        user_base_dn: read_required(ARG_LDAP_USER_BASE_DN)?,
        timeout: Duration::from_secs(timeout),
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LDAP_URL)
                .long(ARG_LDAP_URL)
                .help("LDAP server URL, example: ldaps://ldap.campus.edu:636")
                .env("PORTAL_LDAP_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_LDAP_BIND_DN)
                .long(ARG_LDAP_BIND_DN)
                .help("Service account DN used to modify passwords")
                .env("PORTAL_LDAP_BIND_DN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_LDAP_BIND_PASSWORD)
                .long(ARG_LDAP_BIND_PASSWORD)
                .help("Service account password")
                .env("PORTAL_LDAP_BIND_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_LDAP_USER_BASE_DN)
                .long(ARG_LDAP_USER_BASE_DN)
                .help("Base DN of user entries, example: ou=people,dc=campus,dc=edu")
                .env("PORTAL_LDAP_USER_BASE_DN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_LDAP_TIMEOUT_SECONDS)
                .long(ARG_LDAP_TIMEOUT_SECONDS)
                .help("Timeout for each directory operation")
                .env("PORTAL_LDAP_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}
