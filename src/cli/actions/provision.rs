use crate::{
    api::handlers::valid_email,
    store::{Affiliation, PgStore, User, UserStore},
};
use anyhow::{Context, Result, bail};
use tracing::info;

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub institutional_email: String,
    pub display_name: String,
    pub affiliation: Affiliation,
}

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub account: NewAccount,
}

/// Execute the provision action.
/// # Errors
/// Returns an error if the account is invalid, already exists, or the
/// database is unreachable.
pub async fn execute(args: Args) -> Result<()> {
    let store = PgStore::connect(&args.dsn).await?;
    let user = provision(&store, &args.account).await?;
    info!(
        username = %user.username,
        affiliation = user.affiliation.as_str(),
        "account provisioned, pending activation"
    );
    Ok(())
}

/// Insert a pending account.
/// # Errors
/// Returns an error on invalid input or when the username or institutional
/// email is already taken.
pub async fn provision(store: &dyn UserStore, account: &NewAccount) -> Result<User> {
    let username = account.username.as_str();
    if username.is_empty()
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        bail!("invalid username: {username:?}");
    }
    if !valid_email(&account.institutional_email) {
        bail!("invalid institutional email: {}", account.institutional_email);
    }
    if account.display_name.is_empty() {
        bail!("display name must not be empty");
    }

    let user = User::provisioned(
        username,
        &account.institutional_email,
        &account.display_name,
        account.affiliation,
    );
    store
        .insert(&user)
        .await
        .with_context(|| format!("Failed to provision {username}"))?;
    Ok(user)
}
