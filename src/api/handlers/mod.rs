//! Route handlers and the helpers they share.

pub mod account;
pub mod devices;
pub mod health;
pub mod pin;
pub mod recovery;
pub mod two_factor;

use axum::http::StatusCode;
use regex::Regex;

use super::error::ApiError;
use crate::password;
use crate::store::{User, UserStore};
use crate::sync::SyncError;

/// Lightweight email sanity check.
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Look the user up by username or institutional email and check the password.
pub(crate) async fn authenticate(
    users: &dyn UserStore,
    identifier: &str,
    password: &str,
) -> Result<User, ApiError> {
    let user = users.find_by_identifier(identifier.trim()).await?;
    match user {
        Some(user)
            if user
                .password_hash
                .as_deref()
                .is_some_and(|hash| password::verify_secret(password, hash)) =>
        {
            Ok(user)
        }
        _ => Err(ApiError::unauthorized("Invalid credentials")),
    }
}

/// New password checks shared by activation and change.
pub(crate) fn check_new_password(new_password: &str, confirm_password: &str) -> Result<(), ApiError> {
    if new_password != confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }
    password::check_policy(new_password).map_err(ApiError::BadRequest)
}

/// Collapse a sync result into "was the directory updated"; only a pending
/// directory write is tolerated.
pub(crate) fn directory_synced(result: Result<(), SyncError>) -> Result<bool, ApiError> {
    match result {
        Ok(()) => Ok(true),
        Err(SyncError::DirectoryPending(_)) => Ok(false),
        Err(SyncError::Store(err)) => Err(err.into()),
        Err(SyncError::Hash(err)) => Err(ApiError::Internal(err)),
    }
}

/// 200 when the directory has the new password, 202 when it is pending.
pub(crate) const fn sync_status(directory_synced: bool) -> StatusCode {
    if directory_synced {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    }
}
