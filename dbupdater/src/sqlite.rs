//! SQLite support using the [`rusqlite`](https://crates.io/crates/rusqlite) crate.
//!
//! # Example
//!
//! ```
//! use dbupdater::Update;
//! use dbupdater::sqlite::SqliteUpdater;
//! use rusqlite::Connection;
//!
//! let updates = vec![
//!     Update::new(201810230925, "CREATE TABLE person (id INTEGER PRIMARY KEY, firstname TEXT)"),
//!     Update::new(201810230926, "CREATE TABLE car (id INTEGER PRIMARY KEY, model TEXT)"),
//! ];
//!
//! let updater = SqliteUpdater::new();
//! let mut conn = Connection::open_in_memory().unwrap();
//! let outcome = updater.initialize(&mut conn, &updates).unwrap();
//! assert_eq!(outcome.final_version(), Some(201810230926));
//! assert_eq!(outcome.report().unwrap().applied, vec![201810230925, 201810230926]);
//!
//! // a second run verifies the recorded checksums and applies nothing
//! let outcome = updater.initialize(&mut conn, &updates).unwrap();
//! assert_eq!(outcome.final_version(), Some(201810230926));
//! assert!(outcome.report().unwrap().applied.is_empty());
//! ```
//!
//! # Transactions
//!
//! Each pending update runs in its own transaction together with the insert of its
//! `schema_version` row. Scripts may contain several statements separated by `;`. If any of
//! them fails, everything the script did is rolled back and no row is recorded:
//!
//! ```
//! use dbupdater::{ApplyStage, Error, Update};
//! use dbupdater::sqlite::SqliteUpdater;
//! use rusqlite::Connection;
//!
//! let updates = vec![
//!     Update::new(1, "CREATE TABLE users (id INTEGER PRIMARY KEY)"),
//!     Update::new(2, "DROP TABLE users; DROP TABLE no_such_table;"),
//! ];
//!
//! let updater = SqliteUpdater::new();
//! let mut conn = Connection::open_in_memory().unwrap();
//! let error = updater.initialize(&mut conn, &updates).unwrap_err();
//! assert!(matches!(error, Error::Apply { version: 2, stage: ApplyStage::Script, .. }));
//!
//! // update 1 stays committed, update 2 left no trace
//! assert_eq!(updater.current_version(&mut conn).unwrap(), 1);
//! let users: i64 = conn
//!     .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='users'", [], |row| row.get(0))
//!     .unwrap();
//! assert_eq!(users, 1);
//! ```
//!
//! # Concurrent runs
//!
//! An updater runs one `initialize` at a time. A call made while another is in progress on the
//! same updater returns [Outcome::AlreadyRunning] without touching its connection. Across
//! processes, the connection's busy timeout (see [SqliteUpdater::with_busy_timeout]) makes a
//! competing writer wait for the lock instead of failing immediately.

use crate::checksum::ChecksumAlgorithm;
use crate::core::GenericUpdater;
use crate::error::{ApplyStage, Error};
use crate::store::{parse_applied_at, quote_identifier, VersionStore};
use crate::{AppliedUpdate, Outcome, Update};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::time::Duration;

/// Applies [Update]s to SQLite databases and keeps their schema version table.
#[derive(Debug)]
pub struct SqliteUpdater {
    updater: GenericUpdater,
    busy_timeout: Duration,
}

impl Default for SqliteUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteUpdater {
    pub fn new() -> Self {
        Self {
            updater: GenericUpdater::default(),
            busy_timeout: Duration::from_secs(30),
        }
    }

    /// Set a custom name for the schema version tracking table.
    /// Defaults to "schema_version".
    pub fn with_schema_version_table_name(mut self, name: impl Into<String>) -> Self {
        self.updater.set_schema_version_table_name(name);
        self
    }

    /// Set the function used to fingerprint scripts. Defaults to [ChecksumAlgorithm::JavaHash].
    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.updater.set_checksum_algorithm(algorithm);
        self
    }

    /// Set the busy timeout for SQLite database operations.
    /// This controls how long a run waits for locks held by other connections.
    /// Defaults to 30 seconds.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set a callback to be invoked before an update is applied.
    /// The callback receives the update version.
    ///
    /// ```
    /// use dbupdater::sqlite::SqliteUpdater;
    ///
    /// let updater = SqliteUpdater::new().on_update_start(|version| {
    ///     println!("Applying update {}", version);
    /// });
    /// ```
    pub fn on_update_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.updater.set_on_update_start(callback);
        self
    }

    /// Set a callback to be invoked after an update has been committed.
    /// The callback receives the update version and how long it took.
    pub fn on_update_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(i64, Duration) + Send + Sync + 'static,
    {
        self.updater.set_on_update_complete(callback);
        self
    }

    /// Set a callback to be invoked when an update fails and is rolled back.
    pub fn on_update_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(i64, &Error) + Send + Sync + 'static,
    {
        self.updater.set_on_update_error(callback);
        self
    }

    pub fn schema_version_table_name(&self) -> &str {
        &self.updater.schema_version_table_name
    }

    fn store<'c>(&'c self, conn: &'c mut Connection) -> SqliteStore<'c> {
        SqliteStore {
            conn,
            table: &self.updater.schema_version_table_name,
            quoted_table: quote_identifier(&self.updater.schema_version_table_name),
            busy_timeout: self.busy_timeout,
            has_applied_at: None,
        }
    }

    /// Bring the database up to date with `updates`.
    ///
    /// Creates the schema version table if needed, verifies every recorded update against
    /// `updates`, then applies the updates above the current version in ascending order.
    pub fn initialize(&self, conn: &mut Connection, updates: &[Update]) -> Result<Outcome, Error> {
        self.updater.run(&mut self.store(conn), updates, None)
    }

    /// Like [SqliteUpdater::initialize], but stops after `target_version`.
    ///
    /// Nothing is applied if the database is already at or beyond `target_version`. Otherwise
    /// it must be one of the versions in `updates`.
    pub fn initialize_to(
        &self,
        conn: &mut Connection,
        updates: &[Update],
        target_version: i64,
    ) -> Result<Outcome, Error> {
        self.updater
            .run(&mut self.store(conn), updates, Some(target_version))
    }

    /// Get the current schema version from the database.
    /// Returns 0 if no updates have been applied.
    pub fn current_version(&self, conn: &mut Connection) -> Result<i64, Error> {
        self.updater.current_version(&mut self.store(conn))
    }

    /// Get every recorded update, ordered by version.
    /// Returns an empty vector if the schema version table does not exist.
    pub fn history(&self, conn: &mut Connection) -> Result<Vec<AppliedUpdate>, Error> {
        self.updater.history(&mut self.store(conn))
    }

    /// Preview which updates `initialize` would apply, without applying them.
    ///
    /// Runs the same validation as `initialize`, so a divergent or edited update set fails
    /// here too. Does not create the schema version table.
    pub fn preview(&self, conn: &mut Connection, updates: &[Update]) -> Result<Vec<i64>, Error> {
        self.updater.preview(&mut self.store(conn), updates)
    }
}

struct SqliteStore<'c> {
    conn: &'c mut Connection,
    table: &'c str,
    quoted_table: String,
    busy_timeout: Duration,
    // tables written by older updaters only have (version, checksum)
    has_applied_at: Option<bool>,
}

impl SqliteStore<'_> {
    fn has_applied_at_column(&mut self) -> Result<bool, Error> {
        if let Some(has) = self.has_applied_at {
            return Ok(has);
        }
        let has = {
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA table_info({})", self.quoted_table))?;
            let columns = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;
            columns.iter().any(|column| column == "applied_at")
        };
        self.has_applied_at = Some(has);
        Ok(has)
    }
}

impl VersionStore for SqliteStore<'_> {
    fn table_exists(&mut self) -> Result<bool, Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name = ?1 COLLATE NOCASE")?;
        let exists = stmt.query([self.table])?.next()?.is_some();
        Ok(exists)
    }

    fn ensure_table(&mut self) -> Result<bool, Error> {
        self.conn.busy_timeout(self.busy_timeout)?;
        let existed = self.table_exists()?;
        if !existed {
            // IF NOT EXISTS: another process may create it between the check and here
            self.conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (version INTEGER NOT NULL PRIMARY KEY, checksum INTEGER NOT NULL, applied_at TEXT)",
                    self.quoted_table
                ),
                [],
            )?;
        }
        Ok(existed)
    }

    fn read_all(&mut self) -> Result<Vec<AppliedUpdate>, Error> {
        let applied_at_column = if self.has_applied_at_column()? {
            "applied_at"
        } else {
            "NULL"
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT version, checksum, {} FROM {} ORDER BY version",
            applied_at_column, self.quoted_table
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let applied_at = row
                    .get::<_, Option<String>>(2)?
                    .map(|raw| {
                        parse_applied_at(&raw).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                2,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })
                    })
                    .transpose()?;
                Ok(AppliedUpdate {
                    version: row.get(0)?,
                    checksum: row.get(1)?,
                    applied_at,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn apply(
        &mut self,
        update: &Update,
        checksum: i64,
        applied_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let version = update.version;
        let record_applied_at = self.has_applied_at_column()?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::apply(version, ApplyStage::Transaction, e))?;

        tx.execute_batch(&update.script)
            .map_err(|e| Error::apply(version, ApplyStage::Script, e))?;

        let recorded = if record_applied_at {
            tx.execute(
                &format!(
                    "INSERT INTO {} (version, checksum, applied_at) VALUES (?1, ?2, ?3)",
                    self.quoted_table
                ),
                params![version, checksum, applied_at.to_rfc3339()],
            )
        } else {
            tx.execute(
                &format!(
                    "INSERT INTO {} (version, checksum) VALUES (?1, ?2)",
                    self.quoted_table
                ),
                params![version, checksum],
            )
        };
        recorded.map_err(|e| Error::apply(version, ApplyStage::Record, e))?;

        // Dropping an uncommitted transaction rolls it back
        tx.commit()
            .map_err(|e| Error::apply(version, ApplyStage::Transaction, e))?;
        Ok(())
    }
}
