//! Pending mutation queue repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{
    MutationAction, MutationId, MutationPayload, NewMutation, PendingMutation, RecordId,
};
use crate::util::{from_millis, to_millis};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::json_column;

const SELECT_COLUMNS: &str = "SELECT id, action, payload, priority, enqueued_at, retry_count,
        last_retry_at, last_error, conflict_id
     FROM pending_mutations";

/// Position in the `(priority DESC, id ASC)` drain order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePosition {
    pub priority: i64,
    pub id: MutationId,
}

/// A queued row whose action or payload no longer decodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableMutation {
    pub id: MutationId,
    pub priority: i64,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub error: String,
}

/// One row of a drain-order walk
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEntry {
    Ready(PendingMutation),
    Unreadable(UnreadableMutation),
}

impl QueueEntry {
    pub const fn position(&self) -> QueuePosition {
        match self {
            Self::Ready(mutation) => QueuePosition {
                priority: mutation.priority,
                id: mutation.id,
            },
            Self::Unreadable(row) => QueuePosition {
                priority: row.priority,
                id: row.id,
            },
        }
    }
}

/// Trait for pending-mutation queue operations
pub trait MutationQueue {
    /// Append a mutation; the sequence id is assigned by the store
    fn enqueue(
        &self,
        mutation: &NewMutation,
        priority: i64,
        now: DateTime<Utc>,
    ) -> Result<PendingMutation>;

    /// Next page in drain order strictly after `after`.
    ///
    /// Rows that fail to decode are returned as [`QueueEntry::Unreadable`]
    /// instead of failing the page.
    fn page_after(&self, after: Option<QueuePosition>, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Get a mutation by id
    fn get(&self, id: MutationId) -> Result<Option<PendingMutation>>;

    /// Delete a mutation; returns whether it existed
    fn remove(&self, id: MutationId) -> Result<bool>;

    /// Count all queued mutations
    fn count(&self) -> Result<usize>;

    /// Persist a failed attempt
    fn record_failure(
        &self,
        id: MutationId,
        retry_count: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Mutations whose retry count reached `max_retries`
    fn list_exhausted(&self, max_retries: u32) -> Result<Vec<PendingMutation>>;

    /// Reset retry counters of exhausted mutations; returns how many
    fn reset_exhausted(&self, max_retries: u32) -> Result<usize>;

    /// Queued mutations for one entity in enqueue order
    fn for_entity(&self, entity_id: &RecordId) -> Result<Vec<PendingMutation>>;

    /// Replace the payload (and thereby the entity id) of a mutation
    fn update_payload(&self, id: MutationId, payload: &MutationPayload) -> Result<()>;

    /// Tag a mutation as blocked by a pending conflict
    fn set_conflict(&self, id: MutationId, conflict_id: Option<&str>) -> Result<()>;

    /// Remove every mutation blocked by `conflict_id`; returns how many
    fn remove_by_conflict(&self, conflict_id: &str) -> Result<usize>;
}

/// `SQLite` implementation of `MutationQueue`
pub struct SqliteMutationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMutationQueue<'a> {
    /// Create a new queue view over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a mutation from a database row
    fn parse_mutation(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingMutation> {
        let action: String = row.get(1)?;
        let action = action.parse::<MutationAction>().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, error.into())
        })?;
        let retry_count: i64 = row.get(5)?;

        Ok(PendingMutation {
            id: row.get(0)?,
            action,
            payload: json_column(row, 2)?,
            priority: row.get(3)?,
            enqueued_at: from_millis(row.get(4)?),
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            last_retry_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
            last_error: row.get(7)?,
            conflict_id: row.get(8)?,
        })
    }

    /// Parse a row, keeping its position when the action or payload is corrupt
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
        match Self::parse_mutation(row) {
            Ok(mutation) => Ok(QueueEntry::Ready(mutation)),
            Err(error) => {
                let retry_count: i64 = row.get(5)?;
                Ok(QueueEntry::Unreadable(UnreadableMutation {
                    id: row.get(0)?,
                    priority: row.get(3)?,
                    retry_count: u32::try_from(retry_count).unwrap_or(0),
                    last_retry_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
                    error: error.to_string(),
                }))
            }
        }
    }

    fn query_entries(
        &self,
        sql_suffix: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_COLUMNS} {sql_suffix}"))?;
        let entries = stmt
            .query_map(params, Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Decodable rows only; corrupt ones are left to the drain walk
    fn query(
        &self,
        sql_suffix: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<PendingMutation>> {
        let mutations = self
            .query_entries(sql_suffix, params)?
            .into_iter()
            .filter_map(|entry| match entry {
                QueueEntry::Ready(mutation) => Some(mutation),
                QueueEntry::Unreadable(row) => {
                    tracing::warn!(
                        "Skipping unreadable queued mutation {}: {}",
                        row.id,
                        row.error
                    );
                    None
                }
            })
            .collect();
        Ok(mutations)
    }
}

impl MutationQueue for SqliteMutationQueue<'_> {
    fn enqueue(
        &self,
        mutation: &NewMutation,
        priority: i64,
        now: DateTime<Utc>,
    ) -> Result<PendingMutation> {
        self.conn.execute(
            "INSERT INTO pending_mutations (action, entity_id, payload, priority, enqueued_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                mutation.action.as_str(),
                mutation.payload.entity_id().as_str(),
                serde_json::to_string(&mutation.payload)?,
                priority,
                to_millis(now)
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get(id)?
            .ok_or_else(|| Error::Storage(format!("queued mutation {id} vanished after insert")))
    }

    fn page_after(&self, after: Option<QueuePosition>, limit: usize) -> Result<Vec<QueueEntry>> {
        match after {
            None => self.query_entries(
                "ORDER BY priority DESC, id ASC LIMIT ?",
                params![limit as i64],
            ),
            Some(position) => self.query_entries(
                "WHERE priority < ?1 OR (priority = ?1 AND id > ?2)
                 ORDER BY priority DESC, id ASC LIMIT ?3",
                params![position.priority, position.id, limit as i64],
            ),
        }
    }

    fn get(&self, id: MutationId) -> Result<Option<PendingMutation>> {
        let mutation = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?"),
                params![id],
                Self::parse_mutation,
            )
            .optional()?;
        Ok(mutation)
    }

    fn remove(&self, id: MutationId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM pending_mutations WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_mutations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn record_failure(
        &self,
        id: MutationId,
        retry_count: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE pending_mutations
             SET retry_count = ?, last_retry_at = ?, last_error = ?
             WHERE id = ?",
            params![i64::from(retry_count), to_millis(at), error, id],
        )?;
        Ok(())
    }

    fn list_exhausted(&self, max_retries: u32) -> Result<Vec<PendingMutation>> {
        self.query(
            "WHERE retry_count >= ? ORDER BY priority DESC, id ASC",
            params![i64::from(max_retries)],
        )
    }

    fn reset_exhausted(&self, max_retries: u32) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE pending_mutations SET retry_count = 0 WHERE retry_count >= ?",
            params![i64::from(max_retries)],
        )?;
        Ok(rows)
    }

    fn for_entity(&self, entity_id: &RecordId) -> Result<Vec<PendingMutation>> {
        self.query(
            "WHERE entity_id = ? ORDER BY id ASC",
            params![entity_id.as_str()],
        )
    }

    fn update_payload(&self, id: MutationId, payload: &MutationPayload) -> Result<()> {
        self.conn.execute(
            "UPDATE pending_mutations SET entity_id = ?, payload = ? WHERE id = ?",
            params![
                payload.entity_id().as_str(),
                serde_json::to_string(payload)?,
                id
            ],
        )?;
        Ok(())
    }

    fn set_conflict(&self, id: MutationId, conflict_id: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE pending_mutations SET conflict_id = ? WHERE id = ?",
            params![conflict_id, id],
        )?;
        Ok(())
    }

    fn remove_by_conflict(&self, conflict_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM pending_mutations WHERE conflict_id = ?",
            params![conflict_id],
        )?;
        Ok(rows)
    }
}
