use crate::error::Error;
use crate::{AppliedUpdate, Update};
use chrono::{DateTime, Utc};

/// Access to the schema version table of one database.
///
/// Implementations are bound to a connection and a table name. Every method is a single
/// driver round trip or transaction; none of them retry.
pub(crate) trait VersionStore {
    /// Whether the schema version table exists. Never creates it.
    fn table_exists(&mut self) -> Result<bool, Error>;

    /// Create the schema version table if it is missing. Returns whether it already existed.
    fn ensure_table(&mut self) -> Result<bool, Error>;

    /// All recorded rows, ordered by version ascending.
    fn read_all(&mut self) -> Result<Vec<AppliedUpdate>, Error>;

    /// Run `update.script` and record it, in one transaction.
    ///
    /// Either both the script's effects and the new row are committed, or neither is.
    /// Failures are reported as [Error::Apply] naming the statement that failed.
    fn apply(
        &mut self,
        update: &Update,
        checksum: i64,
        applied_at: DateTime<Utc>,
    ) -> Result<(), Error>;
}

/// Table names are interpolated into SQL, so only plain identifiers are accepted.
pub(crate) fn validate_table_name(name: &str) -> Result<(), Error> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTableName(name.to_string()))
    }
}

/// Double-quote a name accepted by [validate_table_name], so keywords such as `order` remain
/// usable as table names.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Parse a stored `applied_at` value. Timestamps are written as RFC 3339.
pub(crate) fn parse_applied_at(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|date| date.with_timezone(&Utc))
}
