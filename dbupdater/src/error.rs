use std::fmt;

/// The statement inside an update's transaction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    /// Beginning or committing the transaction.
    Transaction,
    /// Executing the update script itself.
    Script,
    /// Inserting the bookkeeping row for the update.
    Record,
}

impl fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyStage::Transaction => f.write_str("transaction"),
            ApplyStage::Script => f.write_str("script"),
            ApplyStage::Record => f.write_str("bookkeeping insert"),
        }
    }
}

/// Error type for the dbupdater crate.
///
/// Driver failures (`Rusqlite`, `Postgres`) are storage errors and are never retried.
/// Every other variant describes a problem with the supplied update set or with the
/// recorded history, and requires a corrected call.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Rusqlite(rusqlite::Error),
    #[cfg(feature = "postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    /// Recorded and requested versions disagree at or below the current schema version.
    #[error("{}", divergence_message(.extra_in_db, .extra_in_request))]
    Divergence {
        /// Versions recorded in the database but absent from the update set.
        extra_in_db: Vec<i64>,
        /// Versions at or below the current version that were never recorded.
        extra_in_request: Vec<i64>,
    },
    /// A previously applied script was edited after it ran.
    #[error(
        "Incorrect checksum found for script with version {version}. \
        File has checksum {actual} while database has checksum {expected}"
    )]
    ChecksumMismatch {
        version: i64,
        /// Checksum recorded when the update was applied.
        expected: i64,
        /// Checksum of the script supplied now.
        actual: i64,
    },
    /// A pending update failed and was rolled back.
    #[error("Update {version} failed during {stage}, update was not executed: {source}")]
    Apply {
        version: i64,
        stage: ApplyStage,
        source: Box<Error>,
    },
    #[error("Duplicate update version found: {0}")]
    DuplicateVersion(i64),
    #[error("Update version must be greater than 0, found version {0}")]
    NonPositiveVersion(i64),
    #[error("Target version {0} does not exist in the update set")]
    UnknownTargetVersion(i64),
    #[error("Invalid schema version table name '{0}'")]
    InvalidTableName(String),
    /// A recorded `applied_at` value is not an RFC 3339 timestamp.
    #[error("Invalid applied_at timestamp '{0}' in schema version table")]
    InvalidAppliedAt(String),
}

impl Error {
    pub(crate) fn apply(version: i64, stage: ApplyStage, source: impl Into<Error>) -> Self {
        Error::Apply {
            version,
            stage,
            source: Box::new(source.into()),
        }
    }

    /// Whether this error came from the database driver rather than from reconciliation.
    pub fn is_storage(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            Error::Rusqlite(_) => true,
            #[cfg(feature = "postgres")]
            Error::Postgres(_) => true,
            _ => false,
        }
    }
}

fn divergence_message(extra_in_db: &[i64], extra_in_request: &[i64]) -> String {
    let join = |versions: &[i64]| {
        versions
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };
    let mut parts = Vec::new();
    if !extra_in_db.is_empty() {
        parts.push(format!(
            "The following updates were found in the database, but not in the current set of updates: {}",
            join(extra_in_db)
        ));
    }
    if !extra_in_request.is_empty() {
        parts.push(format!(
            "The following updates were found in the current set of updates, but not in the database: {}",
            join(extra_in_request)
        ));
    }
    parts.join("; ")
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Rusqlite(value)
    }
}

// Manual PartialEq implementation because postgres::Error doesn't implement PartialEq
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            #[cfg(feature = "sqlite")]
            (Self::Rusqlite(a), Self::Rusqlite(b)) => a == b,
            #[cfg(feature = "postgres")]
            (Self::Postgres(a), Self::Postgres(b)) => a.to_string() == b.to_string(),
            (
                Self::Divergence {
                    extra_in_db: a_db,
                    extra_in_request: a_req,
                },
                Self::Divergence {
                    extra_in_db: b_db,
                    extra_in_request: b_req,
                },
            ) => a_db == b_db && a_req == b_req,
            (
                Self::ChecksumMismatch {
                    version: av,
                    expected: ae,
                    actual: aa,
                },
                Self::ChecksumMismatch {
                    version: bv,
                    expected: be,
                    actual: ba,
                },
            ) => av == bv && ae == be && aa == ba,
            (
                Self::Apply {
                    version: av,
                    stage: a_stage,
                    source: a_src,
                },
                Self::Apply {
                    version: bv,
                    stage: b_stage,
                    source: b_src,
                },
            ) => av == bv && a_stage == b_stage && a_src == b_src,
            (Self::DuplicateVersion(a), Self::DuplicateVersion(b)) => a == b,
            (Self::NonPositiveVersion(a), Self::NonPositiveVersion(b)) => a == b,
            (Self::UnknownTargetVersion(a), Self::UnknownTargetVersion(b)) => a == b,
            (Self::InvalidTableName(a), Self::InvalidTableName(b)) => a == b,
            (Self::InvalidAppliedAt(a), Self::InvalidAppliedAt(b)) => a == b,
            _ => false,
        }
    }
}
