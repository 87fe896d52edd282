//! Selection store implementation
//!
//! The device-local set of visited countries. This store is the durable
//! fallback for unauthenticated use: it is written on every mutation and
//! is never cleared by sign-out or reconciliation.

use libsql::{params, Connection};

use crate::error::StorageError;
use crate::models::{CountryCode, SelectionRecord};

/// Trait for visited-country storage operations (async)
///
/// All operations are idempotent: `upsert` is keyed by code, `remove` and
/// `clear` are no-ops when there is nothing to do. Faults surface as
/// [`StorageError`]; the store performs no internal retry.
#[allow(async_fn_in_trait)]
pub trait SelectionStore {
    /// Insert or replace the record for its code
    async fn upsert(&self, record: &SelectionRecord) -> Result<(), StorageError>;

    /// Delete the record for a code; no-op if absent
    async fn remove(&self, code: CountryCode) -> Result<(), StorageError>;

    /// Fetch a snapshot of all records (unordered, not a live view)
    async fn list(&self) -> Result<Vec<SelectionRecord>, StorageError>;

    /// Check whether a code is currently selected
    async fn has(&self, code: CountryCode) -> Result<bool, StorageError>;

    /// Delete every record
    async fn clear(&self) -> Result<(), StorageError>;
}

/// libSQL implementation of [`SelectionStore`]
#[derive(Clone)]
pub struct LibSqlSelectionStore {
    conn: Connection,
}

impl LibSqlSelectionStore {
    /// Create a new store over the given connection
    #[must_use]
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &libsql::Row) -> Result<SelectionRecord, StorageError> {
        let code: String = row.get(0)?;
        let code = code
            .parse()
            .map_err(|_| StorageError::Corrupt(format!("bad country code in selections: {code}")))?;
        Ok(SelectionRecord {
            code,
            name: row.get(1)?,
            selected_at: row.get(2)?,
        })
    }
}

impl SelectionStore for LibSqlSelectionStore {
    async fn upsert(&self, record: &SelectionRecord) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO selections (code, name, selected_at) VALUES (?, ?, ?)",
                params![
                    record.code.as_str(),
                    record.name.as_str(),
                    record.selected_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, code: CountryCode) -> Result<(), StorageError> {
        self.conn
            .execute(
                "DELETE FROM selections WHERE code = ?",
                params![code.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SelectionRecord>, StorageError> {
        let mut rows = self
            .conn
            .query("SELECT code, name, selected_at FROM selections", ())
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    async fn has(&self, code: CountryCode) -> Result<bool, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM selections WHERE code = ?",
                params![code.as_str()],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.conn.execute("DELETE FROM selections", ()).await?;
        Ok(())
    }
}
