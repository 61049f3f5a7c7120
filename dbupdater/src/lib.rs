#![cfg_attr(docsrs, feature(doc_cfg))]
//! `dbupdater` keeps a relational database schema in step with an ordered set of versioned SQL
//! update scripts.
//!
//! Core concepts:
//! - An [Update] is a version number and a script. Once applied to a database it is immutable:
//!   its version and checksum are recorded in a `schema_version` table and verified on every
//!   later run.
//! - An update set only ever grows. Updates are applied in ascending version order, each in its
//!   own transaction together with its bookkeeping row.
//! - Before anything is applied, the recorded history is reconciled with the requested update
//!   set. Missing, unexpected or edited updates stop the run with a descriptive [Error].
//!
//! # Example
//!
//! ```
//! use dbupdater::{update_set, Outcome};
//! use dbupdater::sqlite::SqliteUpdater;
//! use rusqlite::Connection;
//!
//! let updates = update_set![
//!     201810230925 => "CREATE TABLE person (id INTEGER PRIMARY KEY, firstname TEXT)",
//!     201810230926 => "CREATE TABLE car (id INTEGER PRIMARY KEY, model TEXT)",
//! ];
//!
//! let updater = SqliteUpdater::new();
//! let mut conn = Connection::open_in_memory().unwrap();
//! match updater.initialize(&mut conn, &updates).unwrap() {
//!     Outcome::Completed(report) => assert_eq!(report.final_version, 201810230926),
//!     Outcome::AlreadyRunning => unreachable!("no other run on this updater"),
//! }
//! ```
//!
//! # Concurrency
//!
//! Each updater admits one run at a time. A concurrent call on the same updater returns
//! [Outcome::AlreadyRunning] instead of waiting or failing. Share one updater (for example
//! behind an `Arc`) across the threads of a process that may trigger updates.
//!
//! # Features
//!
//! - Tracing integration - available with the `tracing` feature flag (default).
//! - Testing utilities - available with the `testing` feature flag.
//!
//! # Database support
//!
//! - [`SQLite`](sqlite) - available with the `sqlite` feature flag (default).
//! - [`PostgreSQL`](postgres) - available with the `postgres` feature flag.

mod checksum;
pub use checksum::{checksum, ChecksumAlgorithm};

mod core;
pub use core::{AppliedUpdate, Outcome, Update, UpdateReport};

mod error;
pub use error::{ApplyStage, Error};

mod guard;
mod reconcile;
mod store;

#[macro_use]
mod macros;

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

#[cfg(feature = "testing")]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

#[cfg(all(test, feature = "postgres"))]
pub(crate) mod test_postgres;
