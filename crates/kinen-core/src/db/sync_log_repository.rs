//! Sync log repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{MutationAction, MutationId, SyncLogEntry, SyncOutcome};
use crate::util::{from_millis, to_millis};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};

/// Trait for replay history storage
pub trait SyncLogRepository {
    /// Append one replay outcome
    fn append(
        &self,
        mutation_id: MutationId,
        entity_id: &str,
        action: MutationAction,
        outcome: SyncOutcome,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Most recent entries first
    fn recent(&self, limit: usize) -> Result<Vec<SyncLogEntry>>;

    /// Delete entries older than `cutoff`
    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// `SQLite` implementation of `SyncLogRepository`
pub struct SqliteSyncLogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncLogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncLogEntry> {
        let action: String = row.get(3)?;
        let outcome: String = row.get(4)?;
        Ok(SyncLogEntry {
            id: row.get(0)?,
            mutation_id: row.get(1)?,
            entity_id: row.get(2)?,
            action: action.parse().map_err(|error: String| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, error.into())
            })?,
            outcome: outcome.parse().map_err(|error: String| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, error.into())
            })?,
            message: row.get(5)?,
            created_at: from_millis(row.get(6)?),
        })
    }
}

impl SyncLogRepository for SqliteSyncLogRepository<'_> {
    fn append(
        &self,
        mutation_id: MutationId,
        entity_id: &str,
        action: MutationAction,
        outcome: SyncOutcome,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_log (mutation_id, entity_id, action, outcome, message, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                mutation_id,
                entity_id,
                action.as_str(),
                outcome.as_str(),
                message,
                to_millis(at)
            ],
        )?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, mutation_id, entity_id, action, outcome, message, created_at
             FROM sync_log
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_log WHERE created_at < ?",
            params![to_millis(cutoff)],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    #[test]
    fn test_append_recent_and_prune() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncLogRepository::new(db.connection());

        let old = Utc::now() - Duration::days(45);
        repo.append(
            1,
            "srv-1",
            MutationAction::Update,
            SyncOutcome::Failed,
            Some("HTTP 500"),
            old,
        )
        .unwrap();
        repo.append(
            2,
            "srv-2",
            MutationAction::Create,
            SyncOutcome::Success,
            None,
            Utc::now(),
        )
        .unwrap();

        let recent = repo.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].mutation_id, 2);
        assert_eq!(recent[1].outcome, SyncOutcome::Failed);

        assert_eq!(repo.prune(Utc::now() - Duration::days(30)).unwrap(), 1);
        assert_eq!(repo.recent(10).unwrap().len(), 1);
    }
}
