//! Conflict repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{Conflict, ConflictStatus};
use crate::util::to_millis;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::json_column;

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Insert or replace a conflict
    fn save(&self, conflict: &Conflict) -> Result<()>;

    /// Get a conflict by id
    fn get(&self, id: &str) -> Result<Option<Conflict>>;

    /// List conflicts newest first, optionally filtered by status
    fn list(&self, status: Option<ConflictStatus>, limit: usize) -> Result<Vec<Conflict>>;

    /// All conflicts ever recorded for one entity, oldest first
    fn for_entity(&self, entity_id: &str) -> Result<Vec<Conflict>>;

    /// Delete terminal conflicts settled before `cutoff`; pending ones are kept
    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Number of conflicts awaiting a user decision
    fn count_pending(&self) -> Result<usize>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conflict> {
        json_column(row, 0)
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn save(&self, conflict: &Conflict) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO conflicts
                (id, entity_id, entity_type, status, data, created_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.id,
                conflict.entity_id,
                conflict.entity_type,
                conflict.status.as_str(),
                serde_json::to_string(conflict)?,
                to_millis(conflict.created_at),
                conflict.resolved_at.map(to_millis)
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Conflict>> {
        let conflict = self
            .conn
            .query_row(
                "SELECT data FROM conflicts WHERE id = ?",
                params![id],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn list(&self, status: Option<ConflictStatus>, limit: usize) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM conflicts
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;

        let conflicts = stmt
            .query_map(
                params![status.map(ConflictStatus::as_str), limit as i64],
                Self::parse_conflict,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn for_entity(&self, entity_id: &str) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM conflicts WHERE entity_id = ? ORDER BY created_at ASC, id ASC",
        )?;

        let conflicts = stmt
            .query_map(params![entity_id], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM conflicts
             WHERE status != 'pending'
               AND COALESCE(resolved_at, created_at) < ?",
            params![to_millis(cutoff)],
        )?;
        Ok(rows)
    }

    fn count_pending(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM conflicts WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Record, ResolutionStrategy, ResolvedBy};
    use chrono::Duration;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn conflict() -> Conflict {
        let local = Record::new("anniversary").with_field("name", "Wedding");
        Conflict::new(local.clone(), local, Vec::new())
    }

    #[test]
    fn test_save_and_get() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let conflict = conflict();
        repo.save(&conflict).unwrap();

        let fetched = repo.get(&conflict.id).unwrap().unwrap();
        assert_eq!(fetched, conflict);
        assert_eq!(repo.count_pending().unwrap(), 1);
    }

    #[test]
    fn test_list_filters_by_status() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let pending = conflict();
        let mut resolved = conflict();
        let record = resolved.local.clone();
        resolved.mark_resolved(
            ConflictStatus::Resolved,
            ResolutionStrategy::Local,
            ResolvedBy::User,
            record,
        );
        repo.save(&pending).unwrap();
        repo.save(&resolved).unwrap();

        let only_pending = repo.list(Some(ConflictStatus::Pending), 10).unwrap();
        assert_eq!(only_pending.len(), 1);
        assert_eq!(only_pending[0].id, pending.id);
        assert_eq!(repo.list(None, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_prune_never_deletes_pending() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let mut old_pending = conflict();
        old_pending.created_at = Utc::now() - Duration::days(90);
        let mut old_resolved = conflict();
        let record = old_resolved.local.clone();
        old_resolved.mark_resolved(
            ConflictStatus::AutoResolved,
            ResolutionStrategy::Latest,
            ResolvedBy::System,
            record,
        );
        old_resolved.resolved_at = Some(Utc::now() - Duration::days(60));

        repo.save(&old_pending).unwrap();
        repo.save(&old_resolved).unwrap();

        let removed = repo.prune(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(&old_pending.id).unwrap().is_some());
        assert!(repo.get(&old_resolved.id).unwrap().is_none());
    }

    #[test]
    fn test_prune_keeps_recent_resolved() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        let mut resolved = conflict();
        let record = resolved.local.clone();
        resolved.mark_resolved(
            ConflictStatus::Resolved,
            ResolutionStrategy::Server,
            ResolvedBy::User,
            record,
        );
        repo.save(&resolved).unwrap();

        assert_eq!(repo.prune(Utc::now() - Duration::days(30)).unwrap(), 0);
    }
}
