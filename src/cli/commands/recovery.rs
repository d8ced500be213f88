use crate::api::RecoverySettings;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_RECOVERY_TTL_SECONDS: &str = "recovery-ttl-seconds";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_SYNC_INTERVAL_SECONDS: &str = "sync-interval-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub recovery: RecoverySettings,
    /// `None` when the resync sweep is disabled.
    pub sync_interval: Option<Duration>,
}

impl Options {
    /// # Errors
    /// Returns an error if the recovery TTL is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let ttl = matches
            .get_one::<u64>(ARG_RECOVERY_TTL_SECONDS)
            .copied()
            .unwrap_or(900);
        if ttl == 0 {
            anyhow::bail!("--{ARG_RECOVERY_TTL_SECONDS} must be greater than zero");
        }

        let issuer = matches
            .get_one::<String>(ARG_TOTP_ISSUER)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "CampusPortal".to_string());

        let sync_interval = matches
            .get_one::<u64>(ARG_SYNC_INTERVAL_SECONDS)
            .copied()
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            recovery: RecoverySettings {
                session_ttl: Duration::from_secs(ttl),
                totp_issuer: issuer,
            },
            sync_interval,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RECOVERY_TTL_SECONDS)
                .long(ARG_RECOVERY_TTL_SECONDS)
                .help("Lifetime of recovery sessions and emailed codes")
                .env("PORTAL_RECOVERY_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown by authenticator apps")
                .env("PORTAL_TOTP_ISSUER")
                .default_value("CampusPortal"),
        )
        .arg(
            Arg::new(ARG_SYNC_INTERVAL_SECONDS)
                .long(ARG_SYNC_INTERVAL_SECONDS)
                .help("Interval of the directory resync sweep, 0 disables it")
                .env("PORTAL_SYNC_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}
