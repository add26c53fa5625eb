//! Persistent key-value configuration.
//!
//! Two keys are recognised: `max-retries`, read at enqueue time, and
//! `backoff-base`, read each time a job fails. Values are stored as text and
//! validated as positive integers on write.

use sqlx::SqlitePool;

use crate::error::ConfigError;

/// Key holding the default retry ceiling for new jobs.
pub const MAX_RETRIES_KEY: &str = "max-retries";

/// Key holding the exponential backoff base.
pub const BACKOFF_BASE_KEY: &str = "backoff-base";

/// Default retry ceiling when `max-retries` is unset.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base when `backoff-base` is unset.
pub const DEFAULT_BACKOFF_BASE: u32 = 2;

const KNOWN_KEYS: [&str; 2] = [MAX_RETRIES_KEY, BACKOFF_BASE_KEY];

/// Configuration store backed by the `config` table.
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Validates and stores a value, replacing any previous one.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let normalized = validate(key, value)?;

        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(normalized.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the raw stored value, if any.
    pub async fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        if !KNOWN_KEYS.contains(&key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Returns every known key with its effective value (stored or default).
    pub async fn list(&self) -> Result<Vec<(String, String)>, ConfigError> {
        Ok(vec![
            (MAX_RETRIES_KEY.to_string(), self.max_retries().await?.to_string()),
            (BACKOFF_BASE_KEY.to_string(), self.backoff_base().await?.to_string()),
        ])
    }

    /// Effective `max-retries`.
    pub async fn max_retries(&self) -> Result<u32, ConfigError> {
        self.get_u32(MAX_RETRIES_KEY, DEFAULT_MAX_RETRIES).await
    }

    /// Effective `backoff-base`.
    pub async fn backoff_base(&self) -> Result<u32, ConfigError> {
        self.get_u32(BACKOFF_BASE_KEY, DEFAULT_BACKOFF_BASE).await
    }

    async fn get_u32(&self, key: &str, default: u32) -> Result<u32, ConfigError> {
        match self.get(key).await? {
            Some(raw) => validate(key, &raw),
            None => Ok(default),
        }
    }
}

fn validate(key: &str, value: &str) -> Result<u32, ConfigError> {
    if !KNOWN_KEYS.contains(&key) {
        return Err(ConfigError::UnknownKey(key.to_string()));
    }

    let invalid = |reason: &str| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let parsed: u32 = value
        .trim()
        .parse()
        .map_err(|_| invalid("must be a positive integer"))?;

    if parsed == 0 {
        return Err(invalid("must be at least 1"));
    }

    Ok(parsed)
}
