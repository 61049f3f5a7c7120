//! Testing utilities for update set development and verification for SQLite.
//!
//! The harness pairs an in-memory database with the updater and update set used in production,
//! so tests can move the schema to a given version, seed data and assert on the result.

use crate::{sqlite::SqliteUpdater, Error, Outcome, Update};
use rusqlite::Connection;

/// A test harness for SQLite update sets that provides state control and assertion helpers.
///
/// # Example
///
/// ```
/// use dbupdater::testing::sqlite::SqliteTestHarness;
/// use dbupdater::sqlite::SqliteUpdater;
/// use dbupdater::{update_set, Error};
///
/// # fn test() -> Result<(), Error> {
/// let updates = update_set![
///     1 => "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
///     2 => "ALTER TABLE users ADD COLUMN email TEXT",
/// ];
/// let mut harness = SqliteTestHarness::new(SqliteUpdater::new(), updates);
///
/// // Bring the schema to version 1 and seed data the way it looked back then
/// harness.initialize_to(1)?;
/// harness.execute("INSERT INTO users (id, name) VALUES (1, 'alice')")?;
///
/// harness.initialize()?;
/// harness.assert_column_exists("users", "email")?;
///
/// let name: String = harness.query_one("SELECT name FROM users WHERE id = 1")?;
/// assert_eq!(name, "alice");
/// assert_eq!(harness.recorded_versions()?, vec![1, 2]);
/// # Ok(())
/// # }
/// # test().unwrap();
/// ```
pub struct SqliteTestHarness {
    conn: Connection,
    updater: SqliteUpdater,
    updates: Vec<Update>,
}

impl SqliteTestHarness {
    /// Create a new test harness with the given updater and update set.
    /// These should be the same ones used in the production environment:
    /// as the update set grows, asserts on earlier versions SHOULD NOT CHANGE.
    ///
    /// Uses an in-memory SQLite database.
    ///
    /// # Panics
    ///
    /// Panics if the in-memory database cannot be opened.
    pub fn new(updater: SqliteUpdater, updates: Vec<Update>) -> Self {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory test database");
        Self::with_connection(conn, updater, updates)
    }

    /// Create a test harness with a custom SQLite connection.
    /// Useful for testing with file-based databases or custom settings.
    pub fn with_connection(conn: Connection, updater: SqliteUpdater, updates: Vec<Update>) -> Self {
        Self {
            conn,
            updater,
            updates,
        }
    }

    /// Apply every pending update.
    pub fn initialize(&mut self) -> Result<Outcome, Error> {
        self.updater.initialize(&mut self.conn, &self.updates)
    }

    /// Apply pending updates up to and including `target_version`.
    ///
    /// Returns an error if the target version is above the current version and does not exist
    /// in the update set.
    pub fn initialize_to(&mut self, target_version: i64) -> Result<Outcome, Error> {
        self.updater
            .initialize_to(&mut self.conn, &self.updates, target_version)
    }

    /// Get the current schema version.
    pub fn current_version(&mut self) -> Result<i64, Error> {
        self.updater.current_version(&mut self.conn)
    }

    /// Versions recorded in the schema version table, ascending.
    pub fn recorded_versions(&mut self) -> Result<Vec<i64>, Error> {
        Ok(self
            .updater
            .history(&mut self.conn)?
            .into_iter()
            .map(|row| row.version)
            .collect())
    }

    /// Execute SQL statements (for setting up test data).
    pub fn execute(&mut self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Query a single value from the database.
    pub fn query_one<T>(&mut self, sql: &str) -> Result<T, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let result = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(result)
    }

    /// Direct access to the underlying connection.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Assert that a table exists in the database.
    pub fn assert_table_exists(&mut self, table_name: &str) -> Result<(), Error> {
        if !self.table_exists(table_name)? {
            return Err(Error::Rusqlite(rusqlite::Error::InvalidParameterName(
                format!("Table '{}' does not exist", table_name),
            )));
        }
        Ok(())
    }

    /// Assert that a table does not exist in the database.
    pub fn assert_table_not_exists(&mut self, table_name: &str) -> Result<(), Error> {
        if self.table_exists(table_name)? {
            return Err(Error::Rusqlite(rusqlite::Error::InvalidParameterName(
                format!("Table '{}' exists but should not", table_name),
            )));
        }
        Ok(())
    }

    /// Assert that a column exists in a table.
    pub fn assert_column_exists(
        &mut self,
        table_name: &str,
        column_name: &str,
    ) -> Result<(), Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1)")?;
        let columns = stmt
            .query_map([table_name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if !columns.iter().any(|c| c == column_name) {
            return Err(Error::Rusqlite(rusqlite::Error::InvalidParameterName(
                format!(
                    "Column '{}' does not exist in table '{}'",
                    column_name, table_name
                ),
            )));
        }
        Ok(())
    }

    fn table_exists(&mut self, table_name: &str) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1 COLLATE NOCASE",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
