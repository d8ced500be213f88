use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, Mod};
use secrecy::{ExposeSecret, SecretString};
use std::{collections::HashSet, time::Duration};
use tracing::{debug, instrument, warn};

use super::{Directory, DirectoryError};

const PASSWORD_ATTRIBUTE: &str = "userPassword";

#[derive(Clone)]
pub struct LdapConfig {
    pub url: String,
    pub bind_dn: String,
    pub bind_password: SecretString,
    pub user_base_dn: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("url", &self.url)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"***")
            .field("user_base_dn", &self.user_base_dn)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Binds as the service account and replaces `userPassword` on
/// `uid=<username>,<user_base_dn>`. One connection per call.
#[derive(Debug, Clone)]
pub struct LdapDirectory {
    config: LdapConfig,
}

impl LdapDirectory {
    #[must_use]
    pub fn new(config: LdapConfig) -> Self {
        Self { config }
    }

    /// Distinguished name of a user entry. RFC 4514 special characters in the
    /// username are escaped.
    #[must_use]
    pub fn user_dn(&self, username: &str) -> String {
        format!("uid={},{}", escape_dn_value(username), self.config.user_base_dn)
    }

    async fn modify_password(&self, dn: &str, value: &str) -> Result<(), LdapError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.config.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.url).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                warn!("LDAP connection error: {err}");
            }
        });

        ldap.simple_bind(&self.config.bind_dn, self.config.bind_password.expose_secret())
            .await?
            .success()?;

        let values = HashSet::from([value]);
        let result = ldap
            .modify(dn, vec![Mod::Replace(PASSWORD_ATTRIBUTE, values)])
            .await
            .and_then(ldap3::LdapResult::success);

        // Unbind regardless; the modify outcome is what the caller cares about.
        let _ = ldap.unbind().await;
        result.map(|_| ())
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    #[instrument(skip(self, password_value), fields(ldap.url = %self.config.url))]
    async fn set_password(
        &self,
        username: &str,
        password_value: &str,
    ) -> Result<(), DirectoryError> {
        let dn = self.user_dn(username);
        debug!(dn = %dn, "replacing directory password");

        match tokio::time::timeout(self.config.timeout, self.modify_password(&dn, password_value))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(LdapError::LdapResult { result })) => Err(DirectoryError::Rejected(format!(
                "rc={} {}",
                result.rc, result.text
            ))),
            Ok(Err(err)) => Err(DirectoryError::Unavailable(err.to_string())),
            Err(_) => Err(DirectoryError::Timeout(self.config.timeout.as_secs())),
        }
    }
}

fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for (index, ch) in value.chars().enumerate() {
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (index == 0 && matches!(ch, '#' | ' '))
            || (index + 1 == value.chars().count() && ch == ' ');
        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
