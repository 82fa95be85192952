use sqlx::{Sqlite, SqlitePool, Transaction};
use time::OffsetDateTime;
use tracing::debug;

use crate::auth::{
    password::{self, PasswordError},
    repo_types::{NewUser, User, UserId},
};

pub const MAX_USERNAME_CHARS: usize = 64;
pub const MAX_PASSWORD_BYTES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("username already exists")]
    Conflict,
    #[error(transparent)]
    Hash(#[from] PasswordError),
    #[error("database: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(e),
        }
    }
}

/// Checked before any side effect of a registration.
pub fn validate_credentials(username: &str, password: &str) -> Result<(), StoreError> {
    if username.is_empty() || password.is_empty() {
        return Err(StoreError::Validation("missing required field"));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(StoreError::Validation("username too long"));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(StoreError::Validation("password too long"));
    }
    Ok(())
}

/// Durable username -> credential mapping. Uniqueness is the `UNIQUE` constraint on
/// `users.username`; there is no read-before-insert.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    db: SqlitePool,
}

/// Inserted but uncommitted user. Dropping it rolls the insert back.
pub struct PendingUser {
    tx: Transaction<'static, Sqlite>,
    id: UserId,
}

impl PendingUser {
    pub fn id(&self) -> UserId {
        self.id
    }

    pub async fn commit(self) -> Result<UserId, StoreError> {
        self.tx.commit().await?;
        debug!(user_id = self.id, "user committed");
        Ok(self.id)
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl CredentialStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn open(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        Ok(Self::new(crate::db::connect(database_url, max_connections).await?))
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Validate, hash and insert in one call.
    pub async fn create_user(
        &self,
        username: &str,
        password_plain: &str,
        profile_photo_ref: Option<&str>,
        id_photo_ref: Option<&str>,
    ) -> Result<UserId, StoreError> {
        validate_credentials(username, password_plain)?;
        let password_hash = password::hash_password_blocking(password_plain.to_owned()).await?;
        let pending = self
            .begin_create(&NewUser {
                username,
                password_hash: &password_hash,
                profile_photo_ref,
                id_photo_ref,
            })
            .await?;
        pending.commit().await
    }

    /// Insert inside a fresh transaction. A duplicate username fails here with
    /// [`StoreError::Conflict`] and leaves nothing behind.
    pub async fn begin_create(&self, user: &NewUser<'_>) -> Result<PendingUser, StoreError> {
        let mut tx = self.db.begin().await?;
        let id: UserId = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, password_hash, profile_photo_ref, id_photo_ref, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user.username)
        .bind(user.password_hash)
        .bind(user.profile_photo_ref)
        .bind(user.id_photo_ref)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&mut *tx)
        .await?;
        Ok(PendingUser { tx, id })
    }

    /// Find a user by exact username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, profile_photo_ref, id_photo_ref, created_at
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    #[cfg(test)]
    pub(crate) async fn count_users(&self, username: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.db)
            .await
            .expect("count users")
    }
}
