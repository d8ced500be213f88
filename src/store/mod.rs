//! Persistence for users and devices.
//!
//! Handlers and services only see the [`UserStore`] and [`DeviceStore`]
//! traits. `PgStore` is the production backend; `MemoryStore` backs tests and
//! local runs without a database.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::mac::MacAddress;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Active,
}

impl UserStatus {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Affiliation {
    Student,
    Employee,
}

impl Affiliation {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Employee => "employee",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Self::Student),
            "employee" => Some(Self::Employee),
            _ => None,
        }
    }
}

/// A portal account. `password_hash` and `pin_hash` hold Argon2id PHC strings.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub institutional_email: String,
    pub backup_email: Option<String>,
    pub display_name: String,
    pub affiliation: Affiliation,
    pub status: UserStatus,
    pub password_hash: Option<String>,
    pub last_password_update: Option<DateTime<Utc>>,
    pub pin_hash: Option<String>,
    pub two_factor_enabled: bool,
    pub two_factor_secret: Option<String>,
    pub ldap_synced: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A freshly provisioned account that still has to be activated.
    #[must_use]
    pub fn provisioned(
        username: &str,
        institutional_email: &str,
        display_name: &str,
        affiliation: Affiliation,
    ) -> Self {
        Self {
            username: username.to_string(),
            institutional_email: institutional_email.to_lowercase(),
            backup_email: None,
            display_name: display_name.to_string(),
            affiliation,
            status: UserStatus::Pending,
            password_hash: None,
            last_password_update: None,
            pin_hash: None,
            two_factor_enabled: false,
            two_factor_secret: None,
            ldap_synced: true,
            created_at: Utc::now(),
        }
    }

    /// Address recovery codes go to: backup email first, then the institutional one.
    #[must_use]
    pub fn recovery_email(&self) -> &str {
        self.backup_email
            .as_deref()
            .filter(|email| !email.is_empty())
            .unwrap_or(&self.institutional_email)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Laptop,
    Desktop,
    Phone,
    Tablet,
    Other,
}

impl DeviceType {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Laptop => "laptop",
            Self::Desktop => "desktop",
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Other => "other",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "laptop" => Some(Self::Laptop),
            "desktop" => Some(Self::Desktop),
            "phone" => Some(Self::Phone),
            "tablet" => Some(Self::Tablet),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub mac: MacAddress,
    pub owner: String,
    pub device_type: DeviceType,
    pub manufacturer: String,
    pub last_seen: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Check the backend is reachable (used by `/health`).
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Look a user up by username or institutional email.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError>;

    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    /// Replace the password hash and record whether the directory has it.
    async fn update_password(
        &self,
        username: &str,
        password_hash: &str,
        ldap_synced: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Flag the record as synced, but only while it still holds
    /// `password_hash`. Returns `false` when the hash changed in between.
    async fn mark_synced_if_hash(&self, username: &str, password_hash: &str) -> Result<bool, StoreError>;

    async fn list_unsynced(&self) -> Result<Vec<User>, StoreError>;

    /// Activate a pending account, storing its backup email and first
    /// password in the same write. `Conflict` if it is already active.
    async fn activate(
        &self,
        username: &str,
        backup_email: &str,
        password_hash: &str,
        ldap_synced: bool,
        activated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_pin(&self, username: &str, pin_hash: &str) -> Result<(), StoreError>;

    /// Store (or clear) the TOTP secret and its enabled flag.
    async fn set_two_factor(
        &self,
        username: &str,
        secret: Option<&str>,
        enabled: bool,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert or replace the device keyed by its MAC address.
    async fn upsert(&self, device: &Device) -> Result<(), StoreError>;

    async fn find(&self, mac: &MacAddress) -> Result<Option<Device>, StoreError>;

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Device>, StoreError>;
}
