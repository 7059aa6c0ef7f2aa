use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{BearerToken, User};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Everything that survives a restart of the client.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSession {
    pub access_token: BearerToken,
    pub refresh_token: Option<BearerToken>,
    pub user: User,
}

/// Key/value store backed by a local SQLite file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    #[cfg(test)]
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM session_entries WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    /// Reads the persisted session.
    ///
    /// Returns `None` unless both a usable access token and a parseable user
    /// are stored; a token without a user is not a session.
    pub async fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        let access_token = self
            .get(ACCESS_TOKEN_KEY)
            .await?
            .and_then(|raw| BearerToken::parse(&raw));
        let Some(access_token) = access_token else {
            return Ok(None);
        };
        let Some(raw_user) = self.get(USER_KEY).await? else {
            warn!("access token stored without a user record, ignoring it");
            return Ok(None);
        };
        let user: User = match serde_json::from_str(&raw_user) {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "stored user record is unreadable, ignoring session");
                return Ok(None);
            }
        };
        let refresh_token = self
            .get(REFRESH_TOKEN_KEY)
            .await?
            .and_then(|raw| BearerToken::parse(&raw));

        Ok(Some(PersistedSession {
            access_token,
            refresh_token,
            user,
        }))
    }

    /// Writes all three session keys in one transaction.
    pub async fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let user = serde_json::to_string(&session.user)?;
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let mut entries = vec![
            (ACCESS_TOKEN_KEY, session.access_token.as_str()),
            (USER_KEY, user.as_str()),
        ];
        match &session.refresh_token {
            Some(token) => entries.push((REFRESH_TOKEN_KEY, token.as_str())),
            None => {
                sqlx::query("DELETE FROM session_entries WHERE key = $1")
                    .bind(REFRESH_TOKEN_KEY)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO session_entries (key, value, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(user = %session.user.email, "session persisted");
        Ok(())
    }

    /// Removes all three session keys in one transaction.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for key in SESSION_KEYS {
            sqlx::query("DELETE FROM session_entries WHERE key = $1")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!("persisted session cleared");
        Ok(())
    }
}
