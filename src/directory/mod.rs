//! External credential directory (LDAP).

mod ldap;

pub use ldap::{LdapConfig, LdapDirectory};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory timed out after {0} seconds")]
    Timeout(u64),
    #[error("directory rejected the request: {0}")]
    Rejected(String),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Directory that holds the authoritative institutional credential.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Replace the user's password with an already-hashed directory value
    /// (see [`crate::password::directory_value`]).
    async fn set_password(&self, username: &str, password_value: &str)
    -> Result<(), DirectoryError>;
}
