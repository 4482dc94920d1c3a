//! Record repository implementation

use crate::error::Result;
use crate::models::{Record, RecordId};
use crate::util::to_millis;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::json_column;

/// Trait for record storage operations
pub trait RecordRepository {
    /// Insert or replace a record by id, stamping `last_modified`
    fn put(&self, record: &Record, synced: bool, now: DateTime<Utc>) -> Result<Record>;

    /// Get a record by id
    fn get(&self, id: &RecordId) -> Result<Option<Record>>;

    /// List records, optionally restricted to one entity type, newest first
    fn list(&self, entity_type: Option<&str>) -> Result<Vec<Record>>;

    /// Delete a record; returns whether a row was removed
    fn delete(&self, id: &RecordId) -> Result<bool>;

    /// Update only the remote baseline of a stored record
    fn set_baseline(&self, id: &RecordId, base_updated_at: DateTime<Utc>) -> Result<()>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let mut record: Record = json_column(row, 0)?;
        record.synced = row.get::<_, i32>(1)? != 0;
        Ok(record)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn put(&self, record: &Record, synced: bool, now: DateTime<Utc>) -> Result<Record> {
        let mut stored = record.clone();
        stored.last_modified = Some(now);
        stored.synced = synced;

        self.conn.execute(
            "INSERT OR REPLACE INTO records
                (id, entity_type, is_temporary, data, updated_at, last_modified, synced)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                stored.id.as_str(),
                stored.entity_type,
                i32::from(stored.id.is_temporary()),
                serde_json::to_string(&stored)?,
                to_millis(stored.updated_at),
                to_millis(now),
                i32::from(synced)
            ],
        )?;

        Ok(stored)
    }

    fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                "SELECT data, synced FROM records WHERE id = ?",
                params![id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list(&self, entity_type: Option<&str>) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(
            "SELECT data, synced
             FROM records
             WHERE ?1 IS NULL OR entity_type = ?1
             ORDER BY updated_at DESC, id ASC",
        )?;

        let records = stmt
            .query_map(params![entity_type], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn delete(&self, id: &RecordId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM records WHERE id = ?", params![id.as_str()])?;
        Ok(rows > 0)
    }

    fn set_baseline(&self, id: &RecordId, base_updated_at: DateTime<Utc>) -> Result<()> {
        if let Some(mut record) = self.get(id)? {
            record.base_updated_at = Some(base_updated_at);
            self.conn.execute(
                "UPDATE records SET data = ? WHERE id = ?",
                params![serde_json::to_string(&record)?, id.as_str()],
            )?;
        }
        Ok(())
    }
}
