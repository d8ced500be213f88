use crate::{
    api::{self, Dependencies, RecoverySettings},
    cli::telemetry,
    directory::{LdapConfig, LdapDirectory},
    email::{EmailSender, LogEmailSender, SmtpConfig, SmtpEmailSender},
    mac::vendor::{OuiTable, VendorLookup},
};
use anyhow::{Context, Result};
use reqwest::Client;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub ldap: LdapConfig,
    pub smtp: Option<SmtpConfig>,
    pub recovery: RecoverySettings,
    pub sync_interval: Option<Duration>,
    pub oui_file: Option<PathBuf>,
    pub macvendors_url: String,
    pub maclookup_url: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a collaborator cannot be built or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let email: Arc<dyn EmailSender> = match &args.smtp {
        Some(config) => Arc::new(SmtpEmailSender::new(config)?),
        None => {
            warn!("No SMTP host configured, recovery codes are only logged");
            Arc::new(LogEmailSender)
        }
    };

    let mut table = OuiTable::builtin();
    if let Some(path) = &args.oui_file {
        table = table
            .load_csv(path)
            .with_context(|| format!("Failed to load OUI file {}", path.display()))?;
    }

    let client = Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .timeout(Duration::from_secs(5))
        .build()?;

    let deps = Dependencies {
        directory: Arc::new(LdapDirectory::new(args.ldap)),
        email,
        vendors: VendorLookup::standard(
            table,
            &client,
            &args.macvendors_url,
            &args.maclookup_url,
        ),
        recovery: args.recovery,
        sync_interval: args.sync_interval,
    };

    let result = api::new(args.port, &args.dsn, deps).await;
    telemetry::shutdown_tracer();
    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("ldap_url", args.ldap.url.clone()),
        ("ldap_user_base_dn", args.ldap.user_base_dn.clone()),
        (
            "smtp_host",
            args.smtp
                .as_ref()
                .map_or_else(|| "none (log only)".to_string(), |smtp| smtp.host.clone()),
        ),
        (
            "recovery_ttl",
            format!("{}s", args.recovery.session_ttl.as_secs()),
        ),
        (
            "sync_interval",
            args.sync_interval
                .map_or_else(|| "disabled".to_string(), |d| format!("{}s", d.as_secs())),
        ),
        (
            "oui_file",
            args.oui_file
                .as_ref()
                .map_or_else(|| "builtin".to_string(), |p| p.display().to_string()),
        ),
    ];

    let width = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "portal {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let _ = std::fmt::Write::write_fmt(
            &mut message,
            format_args!("\n  {key:<width$} {value}"),
        );
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
