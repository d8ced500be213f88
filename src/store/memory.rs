use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Device, DeviceStore, StoreError, User, UserStatus, UserStore};
use crate::mac::MacAddress;

/// In-process store; data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    devices: RwLock<HashMap<MacAddress, Device>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_user<F>(&self, username: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.write().await;
        let user = users.get_mut(username).ok_or(StoreError::NotFound)?;
        apply(user);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(username).cloned())
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        if let Some(user) = users.get(identifier) {
            return Ok(Some(user.clone()));
        }
        let email = identifier.to_lowercase();
        Ok(users
            .values()
            .find(|user| user.institutional_email == email)
            .cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.username) {
            return Err(StoreError::Conflict(format!(
                "username {} already exists",
                user.username
            )));
        }
        if users
            .values()
            .any(|existing| existing.institutional_email == user.institutional_email)
        {
            return Err(StoreError::Conflict(format!(
                "institutional email {} already exists",
                user.institutional_email
            )));
        }
        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn update_password(
        &self,
        username: &str,
        password_hash: &str,
        ldap_synced: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_user(username, |user| {
            user.password_hash = Some(password_hash.to_string());
            user.last_password_update = Some(updated_at);
            user.ldap_synced = ldap_synced;
        })
        .await
    }

    async fn mark_synced_if_hash(&self, username: &str, password_hash: &str) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.get_mut(username) {
            Some(user) if user.password_hash.as_deref() == Some(password_hash) => {
                user.ldap_synced = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_unsynced(&self) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().await;
        let mut unsynced: Vec<User> = users
            .values()
            .filter(|user| !user.ldap_synced && user.password_hash.is_some())
            .cloned()
            .collect();
        unsynced.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(unsynced)
    }

    async fn activate(
        &self,
        username: &str,
        backup_email: &str,
        password_hash: &str,
        ldap_synced: bool,
        activated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(username).ok_or(StoreError::NotFound)?;
        if user.status == UserStatus::Active {
            return Err(StoreError::Conflict(format!(
                "account {username} is already active"
            )));
        }
        user.status = UserStatus::Active;
        user.backup_email = Some(backup_email.to_string());
        user.password_hash = Some(password_hash.to_string());
        user.last_password_update = Some(activated_at);
        user.ldap_synced = ldap_synced;
        Ok(())
    }

    async fn set_pin(&self, username: &str, pin_hash: &str) -> Result<(), StoreError> {
        self.with_user(username, |user| user.pin_hash = Some(pin_hash.to_string()))
            .await
    }

    async fn set_two_factor(
        &self,
        username: &str,
        secret: Option<&str>,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.with_user(username, |user| {
            user.two_factor_secret = secret.map(str::to_string);
            user.two_factor_enabled = enabled;
        })
        .await
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn upsert(&self, device: &Device) -> Result<(), StoreError> {
        if !self.users.read().await.contains_key(&device.owner) {
            return Err(StoreError::NotFound);
        }
        self.devices
            .write()
            .await
            .insert(device.mac.clone(), device.clone());
        Ok(())
    }

    async fn find(&self, mac: &MacAddress) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.read().await.get(mac).cloned())
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Device>, StoreError> {
        let devices = self.devices.read().await;
        let mut owned: Vec<Device> = devices
            .values()
            .filter(|device| device.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.mac.as_str().cmp(b.mac.as_str()));
        Ok(owned)
    }
}
