//! Password synchronization between the directory and the local store.
//!
//! A password change goes to the directory first and then to the local
//! record. When the directory call fails the local write still happens, the
//! record is flagged `ldap_synced = false`, and the caller gets
//! [`SyncError::DirectoryPending`]. A background sweep later re-pushes every
//! unsynced record one by one; failures there are logged and skipped, with no
//! retry limit and no backoff.

use chrono::Utc;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::directory::{Directory, DirectoryError};
use crate::password;
use crate::store::{StoreError, User, UserStore};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Local hash updated; the directory still has the old password.
    #[error("password saved locally but the directory update failed: {0}")]
    DirectoryPending(#[source] DirectoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to hash password")]
    Hash(#[source] anyhow::Error),
}

/// Result of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    /// Pushed, but the password changed again before the flag was set.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn UserStore>,
    directory: Arc<dyn Directory>,
}

impl SyncService {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, directory: Arc<dyn Directory>) -> Self {
        Self { store, directory }
    }

    /// Set a new password for `user` in the directory and locally.
    ///
    /// # Errors
    /// `DirectoryPending` when only the local write succeeded; `Store` or
    /// `Hash` when nothing was changed.
    #[instrument(skip(self, user, new_password), fields(username = %user.username))]
    pub async fn sync_password(&self, user: &User, new_password: &str) -> Result<(), SyncError> {
        let (hash, directory_result) = self.push_new(&user.username, new_password).await?;
        self.store
            .update_password(&user.username, &hash, directory_result.is_ok(), Utc::now())
            .await?;
        settle(directory_result, "password updated in directory and local store")
    }

    /// Activate a pending account with its first password. Status, backup
    /// email and hash are stored in one write, so a failure leaves the
    /// account pending.
    ///
    /// # Errors
    /// Same as [`Self::sync_password`]; `Store(Conflict)` if the account was
    /// activated concurrently.
    #[instrument(skip(self, user, backup_email, password), fields(username = %user.username))]
    pub async fn activate_account(
        &self,
        user: &User,
        backup_email: &str,
        password: &str,
    ) -> Result<(), SyncError> {
        let (hash, directory_result) = self.push_new(&user.username, password).await?;
        self.store
            .activate(
                &user.username,
                backup_email,
                &hash,
                directory_result.is_ok(),
                Utc::now(),
            )
            .await?;
        settle(directory_result, "account activated in directory and local store")
    }

    async fn push_new(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(String, Result<(), DirectoryError>), SyncError> {
        let hash = password::hash_secret(password).map_err(SyncError::Hash)?;
        let directory_result = self
            .directory
            .set_password(username, &password::directory_value(&hash))
            .await;
        Ok((hash, directory_result))
    }

    /// Re-push every unsynced record. Individual failures are logged and do
    /// not stop the sweep. A record is flagged synced only if it still holds
    /// the hash that was pushed.
    ///
    /// # Errors
    /// Only when the list of unsynced users cannot be loaded.
    #[instrument(skip(self))]
    pub async fn sync_existing_users(&self) -> Result<SweepReport, StoreError> {
        let pending = self.store.list_unsynced().await?;
        let mut report = SweepReport::default();

        for user in pending {
            let Some(hash) = user.password_hash.as_deref() else {
                continue;
            };
            report.attempted += 1;

            if let Err(err) = self
                .directory
                .set_password(&user.username, &password::directory_value(hash))
                .await
            {
                warn!(username = %user.username, error = %err, "directory resync failed");
                report.failed += 1;
                continue;
            }

            match self.store.mark_synced_if_hash(&user.username, hash).await {
                Ok(true) => report.synced += 1,
                Ok(false) => {
                    info!(username = %user.username, "password changed during resync; left for the next sweep");
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(username = %user.username, error = %err, "failed to flag user as synced");
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                skipped = report.skipped,
                "directory resync sweep finished"
            );
        }
        Ok(report)
    }
}

fn settle(directory_result: Result<(), DirectoryError>, done: &str) -> Result<(), SyncError> {
    match directory_result {
        Ok(()) => {
            info!("{done}");
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "directory update failed; record flagged for resync");
            Err(SyncError::DirectoryPending(err))
        }
    }
}

/// Spawn the periodic reconciliation sweep. `interval` must be non-zero; the
/// CLI turns `0` into "no worker".
pub fn spawn_sync_worker(service: SyncService, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            if let Err(err) = service.sync_existing_users().await {
                error!("directory resync sweep failed: {err}");
            }
        }
    })
}
