//! Settings repository for the stored API credential

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::DbPool;
use crate::{Error, Result};

/// The persisted settings row
#[derive(Clone)]
pub struct StoredSettings {
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for StoredSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSettings")
            .field("api_key", &self.api_key.as_deref().map(mask_key))
            .field("api_endpoint", &self.api_endpoint)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Mask a key for display, keeping only the last four characters
#[must_use]
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(chars.len() - 4))
}

/// Settings repository
#[derive(Clone)]
pub struct SettingsRepo {
    pool: DbPool,
}

impl SettingsRepo {
    /// Create a new settings repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Read the stored settings, if any were saved
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self) -> Result<Option<StoredSettings>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.query_row(
            "SELECT api_key, api_endpoint, updated_at FROM settings WHERE id = 1",
            [],
            |row| {
                Ok(StoredSettings {
                    api_key: row.get(0)?,
                    api_endpoint: row.get(1)?,
                    updated_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Save the API key and optional endpoint override
    ///
    /// Blank values are stored as absent.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn save(&self, api_key: &str, api_endpoint: Option<&str>) -> Result<StoredSettings> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let api_key = Some(api_key.trim()).filter(|k| !k.is_empty());
        let api_endpoint = api_endpoint.map(str::trim).filter(|e| !e.is_empty());
        let now = Utc::now();

        conn.execute(
            "INSERT INTO settings (id, api_key, api_endpoint, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                api_key = excluded.api_key,
                api_endpoint = excluded.api_endpoint,
                updated_at = excluded.updated_at",
            rusqlite::params![api_key, api_endpoint, now.to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::debug!(has_endpoint = api_endpoint.is_some(), "settings saved");

        Ok(StoredSettings {
            api_key: api_key.map(str::to_string),
            api_endpoint: api_endpoint.map(str::to_string),
            updated_at: now,
        })
    }

    /// Remove the stored settings
    ///
    /// Returns true if a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear(&self) -> Result<bool> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let rows = conn
            .execute("DELETE FROM settings WHERE id = 1", [])
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows > 0)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
