use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Connection, FromRow, PgPool, Row,
    postgres::{PgPoolOptions, PgQueryResult, PgRow},
};
use std::time::Duration;
use tracing::{Instrument, info_span};

use super::{
    Affiliation, Device, DeviceStore, DeviceType, StoreError, User, UserStatus, UserStore,
};
use crate::mac::MacAddress;

const USER_COLUMNS: &str = r"
    username, institutional_email, backup_email, display_name,
    affiliation::text AS affiliation, status::text AS status,
    password_hash, last_password_update, pin_hash,
    two_factor_enabled, two_factor_secret, ldap_synced, created_at
";

const DEVICE_COLUMNS: &str = "mac, owner, device_type::text AS device_type, manufacturer, last_seen";

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {column} value: {value}"),
    )))
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let affiliation: String = row.try_get("affiliation")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            username: row.try_get("username")?,
            institutional_email: row.try_get("institutional_email")?,
            backup_email: row.try_get("backup_email")?,
            display_name: row.try_get("display_name")?,
            affiliation: Affiliation::parse(&affiliation)
                .ok_or_else(|| decode_error("users.affiliation", &affiliation))?,
            status: UserStatus::parse(&status)
                .ok_or_else(|| decode_error("users.status", &status))?,
            password_hash: row.try_get("password_hash")?,
            last_password_update: row.try_get("last_password_update")?,
            pin_hash: row.try_get("pin_hash")?,
            two_factor_enabled: row.try_get("two_factor_enabled")?,
            two_factor_secret: row.try_get("two_factor_secret")?,
            ldap_synced: row.try_get("ldap_synced")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Device {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let mac: String = row.try_get("mac")?;
        let device_type: String = row.try_get("device_type")?;
        Ok(Self {
            mac: MacAddress::parse(&mac).map_err(|_| decode_error("devices.mac", &mac))?,
            owner: row.try_get("owner")?,
            device_type: DeviceType::parse(&device_type)
                .ok_or_else(|| decode_error("devices.device_type", &device_type))?,
            manufacturer: row.try_get("manufacturer")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            // unique_violation
            Some("23505") => return StoreError::Conflict(db_err.message().to_string()),
            // foreign_key_violation: the referenced user is gone
            Some("23503") => return StoreError::NotFound,
            _ => {}
        }
    }
    StoreError::Database(err)
}

/// Zero affected rows on a keyed update means the user does not exist.
fn expect_row(result: PgQueryResult) -> Result<(), StoreError> {
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

fn query_span(operation: &'static str, statement: &str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// PostgreSQL-backed store (see `sql/schema.sql`).
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small connection pool against `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(dsn: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await?;
        conn.ping()
            .instrument(info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await?;
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        Ok(user)
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR institutional_email = lower($1) LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        Ok(user)
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO users
                (username, institutional_email, backup_email, display_name, affiliation, status,
                 password_hash, last_password_update, pin_hash, two_factor_enabled,
                 two_factor_secret, ldap_synced, created_at)
            VALUES ($1, $2, $3, $4, $5::affiliation, $6::user_status, $7, $8, $9, $10, $11, $12, $13)
        ";
        sqlx::query(query)
            .bind(&user.username)
            .bind(&user.institutional_email)
            .bind(&user.backup_email)
            .bind(&user.display_name)
            .bind(user.affiliation.as_str())
            .bind(user.status.as_str())
            .bind(&user.password_hash)
            .bind(user.last_password_update)
            .bind(&user.pin_hash)
            .bind(user.two_factor_enabled)
            .bind(&user.two_factor_secret)
            .bind(user.ldap_synced)
            .bind(user.created_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn update_password(
        &self,
        username: &str,
        password_hash: &str,
        ldap_synced: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET password_hash = $2, ldap_synced = $3, last_password_update = $4
            WHERE username = $1
        ";
        let result = sqlx::query(query)
            .bind(username)
            .bind(password_hash)
            .bind(ldap_synced)
            .bind(updated_at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(map_write_error)?;
        expect_row(result)
    }

    async fn mark_synced_if_hash(&self, username: &str, password_hash: &str) -> Result<bool, StoreError> {
        let query = "UPDATE users SET ldap_synced = TRUE WHERE username = $1 AND password_hash = $2";
        let result = sqlx::query(query)
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(map_write_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_unsynced(&self) -> Result<Vec<User>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE ldap_synced = FALSE AND password_hash IS NOT NULL ORDER BY username"
        );
        let users = sqlx::query_as::<_, User>(&query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        Ok(users)
    }

    async fn activate(
        &self,
        username: &str,
        backup_email: &str,
        password_hash: &str,
        ldap_synced: bool,
        activated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET status = 'active', backup_email = $2, password_hash = $3,
                ldap_synced = $4, last_password_update = $5
            WHERE username = $1 AND status = 'pending'
        ";
        let result = sqlx::query(query)
            .bind(username)
            .bind(backup_email)
            .bind(password_hash)
            .bind(ldap_synced)
            .bind(activated_at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(map_write_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        match self.find_by_username(username).await? {
            Some(_) => Err(StoreError::Conflict(format!(
                "account {username} is already active"
            ))),
            None => Err(StoreError::NotFound),
        }
    }

    async fn set_pin(&self, username: &str, pin_hash: &str) -> Result<(), StoreError> {
        let query = "UPDATE users SET pin_hash = $2 WHERE username = $1";
        let result = sqlx::query(query)
            .bind(username)
            .bind(pin_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(map_write_error)?;
        expect_row(result)
    }

    async fn set_two_factor(
        &self,
        username: &str,
        secret: Option<&str>,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET two_factor_secret = $2, two_factor_enabled = $3
            WHERE username = $1
        ";
        let result = sqlx::query(query)
            .bind(username)
            .bind(secret)
            .bind(enabled)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(map_write_error)?;
        expect_row(result)
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn upsert(&self, device: &Device) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO devices (mac, owner, device_type, manufacturer, last_seen)
            VALUES ($1, $2, $3::device_type, $4, $5)
            ON CONFLICT (mac) DO UPDATE
            SET owner = EXCLUDED.owner,
                device_type = EXCLUDED.device_type,
                manufacturer = EXCLUDED.manufacturer,
                last_seen = EXCLUDED.last_seen
        ";
        sqlx::query(query)
            .bind(device.mac.as_str())
            .bind(&device.owner)
            .bind(device.device_type.as_str())
            .bind(&device.manufacturer)
            .bind(device.last_seen)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn find(&self, mac: &MacAddress) -> Result<Option<Device>, StoreError> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE mac = $1");
        let device = sqlx::query_as::<_, Device>(&query)
            .bind(mac.as_str())
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        Ok(device)
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Device>, StoreError> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE owner = $1 ORDER BY mac");
        let devices = sqlx::query_as::<_, Device>(&query)
            .bind(owner)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        Ok(devices)
    }
}
