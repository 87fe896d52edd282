//! Settings store implementation
//!
//! A single logical record (constant row id) holding the homeland
//! selection, the first-run flag, and display preferences. Writes are
//! last-write-wins; there is no versioning.

use libsql::{params, Connection, Row, Value};

use crate::error::StorageError;
use crate::models::{Homeland, LocalSettings, Preferences};
use crate::util::unix_timestamp_millis;

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsStore {
    /// Load the full settings record
    async fn load(&self) -> Result<LocalSettings, StorageError>;

    /// Get the homeland, if set
    async fn homeland(&self) -> Result<Option<Homeland>, StorageError>;

    /// Overwrite the homeland unconditionally
    async fn set_homeland(&self, homeland: &Homeland) -> Result<(), StorageError>;

    /// Clear the homeland; no-op if unset
    async fn clear_homeland(&self) -> Result<(), StorageError>;

    /// Whether the welcome screen has been dismissed
    async fn has_seen_welcome(&self) -> Result<bool, StorageError>;

    /// Record that the welcome screen was dismissed
    async fn mark_welcome_seen(&self) -> Result<(), StorageError>;

    /// Get the display preferences
    async fn preferences(&self) -> Result<Preferences, StorageError>;

    /// Overwrite the display preferences
    async fn set_preferences(&self, prefs: &Preferences) -> Result<(), StorageError>;
}

/// libSQL implementation of [`SettingsStore`]
#[derive(Clone)]
pub struct LibSqlSettingsStore {
    conn: Connection,
}

impl LibSqlSettingsStore {
    /// Create a new store over the given connection
    #[must_use]
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn row(&self) -> Result<Row, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT homeland_code, homeland_name, homeland_set_at,
                        has_seen_welcome, preferences, updated_at
                 FROM settings WHERE id = 1",
                (),
            )
            .await?;

        rows.next().await?.ok_or_else(|| {
            StorageError::Corrupt("settings row missing; migrations did not run".into())
        })
    }

    fn opt_text(row: &Row, idx: i32) -> Result<Option<String>, StorageError> {
        match row.get_value(idx)? {
            Value::Null => Ok(None),
            Value::Text(text) => Ok(Some(text)),
            other => Err(StorageError::Corrupt(format!(
                "expected text in settings column {idx}, got {other:?}"
            ))),
        }
    }

    fn opt_integer(row: &Row, idx: i32) -> Result<Option<i64>, StorageError> {
        match row.get_value(idx)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(value)),
            other => Err(StorageError::Corrupt(format!(
                "expected integer in settings column {idx}, got {other:?}"
            ))),
        }
    }

    fn parse_settings(row: &Row) -> Result<LocalSettings, StorageError> {
        let homeland = match (
            Self::opt_text(row, 0)?,
            Self::opt_text(row, 1)?,
            Self::opt_integer(row, 2)?,
        ) {
            (Some(code), Some(name), Some(set_at)) => Some(Homeland {
                code: code.parse().map_err(|_| {
                    StorageError::Corrupt(format!("bad homeland code in settings: {code}"))
                })?,
                name,
                set_at,
            }),
            _ => None,
        };

        let preferences_json: String = row.get(4)?;
        let preferences: Preferences = serde_json::from_str(&preferences_json)
            .map_err(|e| StorageError::Corrupt(format!("bad preferences JSON: {e}")))?;

        Ok(LocalSettings {
            homeland,
            has_seen_welcome: row.get::<i32>(3)? != 0,
            preferences,
            updated_at: row.get(5)?,
        })
    }
}

impl SettingsStore for LibSqlSettingsStore {
    async fn load(&self) -> Result<LocalSettings, StorageError> {
        let row = self.row().await?;
        Self::parse_settings(&row)
    }

    async fn homeland(&self) -> Result<Option<Homeland>, StorageError> {
        Ok(self.load().await?.homeland)
    }

    async fn set_homeland(&self, homeland: &Homeland) -> Result<(), StorageError> {
        self.conn
            .execute(
                "UPDATE settings
                 SET homeland_code = ?, homeland_name = ?, homeland_set_at = ?, updated_at = ?
                 WHERE id = 1",
                params![
                    homeland.code.as_str(),
                    homeland.name.as_str(),
                    homeland.set_at,
                    unix_timestamp_millis()
                ],
            )
            .await?;
        Ok(())
    }

    async fn clear_homeland(&self) -> Result<(), StorageError> {
        self.conn
            .execute(
                "UPDATE settings
                 SET homeland_code = NULL, homeland_name = NULL, homeland_set_at = NULL,
                     updated_at = ?
                 WHERE id = 1",
                params![unix_timestamp_millis()],
            )
            .await?;
        Ok(())
    }

    async fn has_seen_welcome(&self) -> Result<bool, StorageError> {
        Ok(self.load().await?.has_seen_welcome)
    }

    async fn mark_welcome_seen(&self) -> Result<(), StorageError> {
        self.conn
            .execute(
                "UPDATE settings SET has_seen_welcome = 1, updated_at = ? WHERE id = 1",
                params![unix_timestamp_millis()],
            )
            .await?;
        Ok(())
    }

    async fn preferences(&self) -> Result<Preferences, StorageError> {
        Ok(self.load().await?.preferences)
    }

    async fn set_preferences(&self, prefs: &Preferences) -> Result<(), StorageError> {
        let json = serde_json::to_string(prefs)
            .map_err(|e| StorageError::Corrupt(format!("unserializable preferences: {e}")))?;
        self.conn
            .execute(
                "UPDATE settings SET preferences = ?, updated_at = ? WHERE id = 1",
                params![json, unix_timestamp_millis()],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> LibSqlSettingsStore {
        let db = Database::open_in_memory().await.unwrap();
        LibSqlSettingsStore::new(db.connection().clone())
    }

    fn homeland(code: &str, name: &str) -> Homeland {
        Homeland {
            code: code.parse().unwrap(),
            name: name.into(),
            set_at: unix_timestamp_millis(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_defaults() {
        let store = setup().await;

        let settings = store.load().await.unwrap();
        assert!(settings.homeland.is_none());
        assert!(!settings.has_seen_welcome);
        assert_eq!(settings.preferences, Preferences::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_and_clear_homeland() {
        let store = setup().await;

        store.set_homeland(&homeland("POL", "Poland")).await.unwrap();
        let loaded = store.homeland().await.unwrap().unwrap();
        assert_eq!(loaded.code.as_str(), "POL");
        assert_eq!(loaded.name, "Poland");

        // Last write wins, no merge
        store.set_homeland(&homeland("ITA", "Italy")).await.unwrap();
        let loaded = store.homeland().await.unwrap().unwrap();
        assert_eq!(loaded.code.as_str(), "ITA");

        store.clear_homeland().await.unwrap();
        assert!(store.homeland().await.unwrap().is_none());
        // Clearing twice is fine
        store.clear_homeland().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_welcome_flag() {
        let store = setup().await;

        assert!(!store.has_seen_welcome().await.unwrap());
        store.mark_welcome_seen().await.unwrap();
        assert!(store.has_seen_welcome().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_preferences_roundtrip() {
        let store = setup().await;

        let prefs = Preferences {
            show_labels: false,
            show_visited_count: true,
        };
        store.set_preferences(&prefs).await.unwrap();
        assert_eq!(store.preferences().await.unwrap(), prefs);
    }
}
