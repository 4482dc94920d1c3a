//! Settings repository implementation

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for key/value settings storage
pub trait SettingsRepository {
    /// Read a setting; `None` when it was never written
    fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Write a setting, replacing any previous value
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// `SQLite` implementation of `SettingsRepository`
pub struct SqliteSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for SqliteSettingsRepository<'_> {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_missing_setting_is_none() {
        let db = setup();
        let repo = SqliteSettingsRepository::new(db.connection());

        assert_eq!(repo.get_setting("last_sync_at").unwrap(), None);
    }

    #[test]
    fn test_set_and_overwrite_setting() {
        let db = setup();
        let repo = SqliteSettingsRepository::new(db.connection());

        repo.set_setting("theme", "dark").unwrap();
        repo.set_setting("theme", "light").unwrap();

        assert_eq!(repo.get_setting("theme").unwrap().as_deref(), Some("light"));
    }
}
