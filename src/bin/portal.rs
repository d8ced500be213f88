use anyhow::{Context, Result};
use portal::cli;
use rustls::crypto::ring;

#[tokio::main]
async fn main() -> Result<()> {
    // ldap3, lettre, reqwest and sqlx all link rustls; pin one provider.
    ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))
        .context("TLS crypto provider initialization failed")?;

    let action = cli::start()?;

    action.execute().await?;

    Ok(())
}
