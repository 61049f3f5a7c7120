use crate::checksum::ChecksumAlgorithm;
use crate::error::{ApplyStage, Error};
use crate::guard::RunGuard;
use crate::reconcile::{reconcile, validate_updates};
use crate::store::{validate_table_name, VersionStore};
use chrono::Utc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

/// One versioned schema update script.
///
/// Versions must be unique within an update set and greater than 0. They only need to be
/// ordered, not contiguous: timestamp-derived versions such as `201810230925` are typical.
///
/// Once an update has been applied to any database, neither its version nor its script may
/// change. The script's checksum is recorded and verified on every later run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub version: i64,
    pub script: String,
}

impl Update {
    pub fn new(version: i64, script: impl Into<String>) -> Self {
        Self {
            version,
            script: script.into(),
        }
    }
}

/// A row of the schema version table: an update that has been applied to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdate {
    /// The version number of the update.
    pub version: i64,
    /// The checksum of the update's script at the time it was applied.
    pub checksum: i64,
    /// When the update was applied. `None` for rows in tables without an `applied_at` column.
    pub applied_at: Option<chrono::DateTime<Utc>>,
}

/// A report of actions performed by a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReport {
    pub schema_version_table_existed: bool,
    /// The schema version before the run.
    pub previous_version: i64,
    /// The schema version after the run. Equal to `previous_version` when nothing was pending.
    pub final_version: i64,
    /// Versions applied by this run, in the order they were applied.
    pub applied: Vec<i64>,
}

/// The result of an `initialize` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The run reconciled the update set and applied everything pending.
    Completed(UpdateReport),
    /// Another run was active on the same updater, so this call did nothing.
    AlreadyRunning,
}

impl Outcome {
    /// The schema version after a completed run, or `None` if the call was skipped.
    pub fn final_version(&self) -> Option<i64> {
        match self {
            Outcome::Completed(report) => Some(report.final_version),
            Outcome::AlreadyRunning => None,
        }
    }

    pub fn report(&self) -> Option<&UpdateReport> {
        match self {
            Outcome::Completed(report) => Some(report),
            Outcome::AlreadyRunning => None,
        }
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, Outcome::AlreadyRunning)
    }
}

pub(crate) const DEFAULT_VERSION_TABLE_NAME: &str = "schema_version";

/// Shared updater logic between different database types.
pub(crate) struct GenericUpdater {
    pub schema_version_table_name: String,
    pub checksum_algorithm: ChecksumAlgorithm,
    pub on_update_start: Option<Box<dyn Fn(i64) + Send + Sync>>,
    pub on_update_complete: Option<Box<dyn Fn(i64, Duration) + Send + Sync>>,
    pub on_update_error: Option<Box<dyn Fn(i64, &Error) + Send + Sync>>,
    active: AtomicBool,
}

// Manual Debug impl since closures don't implement Debug
impl std::fmt::Debug for GenericUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericUpdater")
            .field("schema_version_table_name", &self.schema_version_table_name)
            .field("checksum_algorithm", &self.checksum_algorithm)
            .field("on_update_start", &self.on_update_start.is_some())
            .field("on_update_complete", &self.on_update_complete.is_some())
            .field("on_update_error", &self.on_update_error.is_some())
            .field("active", &self.active)
            .finish()
    }
}

impl Default for GenericUpdater {
    fn default() -> Self {
        Self {
            schema_version_table_name: DEFAULT_VERSION_TABLE_NAME.to_string(),
            checksum_algorithm: ChecksumAlgorithm::default(),
            on_update_start: None,
            on_update_complete: None,
            on_update_error: None,
            active: AtomicBool::new(false),
        }
    }
}

impl GenericUpdater {
    pub fn set_schema_version_table_name(&mut self, name: impl Into<String>) {
        self.schema_version_table_name = name.into();
    }

    pub fn set_checksum_algorithm(&mut self, algorithm: ChecksumAlgorithm) {
        self.checksum_algorithm = algorithm;
    }

    pub fn set_on_update_start(&mut self, callback: impl Fn(i64) + Send + Sync + 'static) {
        self.on_update_start = Some(Box::new(callback));
    }

    pub fn set_on_update_complete(
        &mut self,
        callback: impl Fn(i64, Duration) + Send + Sync + 'static,
    ) {
        self.on_update_complete = Some(Box::new(callback));
    }

    pub fn set_on_update_error(&mut self, callback: impl Fn(i64, &Error) + Send + Sync + 'static) {
        self.on_update_error = Some(Box::new(callback));
    }

    /// Highest recorded version, or 0. Never creates the schema version table.
    pub fn current_version<S: VersionStore>(&self, store: &mut S) -> Result<i64, Error> {
        Ok(self
            .history(store)?
            .iter()
            .map(|row| row.version)
            .max()
            .unwrap_or(0))
    }

    /// All recorded rows ordered by version. Never creates the schema version table.
    pub fn history<S: VersionStore>(&self, store: &mut S) -> Result<Vec<AppliedUpdate>, Error> {
        validate_table_name(&self.schema_version_table_name)?;
        if !store.table_exists()? {
            return Ok(vec![]);
        }
        let mut rows = store.read_all()?;
        rows.sort_by_key(|row| row.version);
        Ok(rows)
    }

    /// Reconcile without applying anything, returning the versions a run would apply.
    pub fn preview<S: VersionStore>(
        &self,
        store: &mut S,
        updates: &[Update],
    ) -> Result<Vec<i64>, Error> {
        validate_updates(updates)?;
        let recorded = self.history(store)?;
        let plan = reconcile(&recorded, updates, self.checksum_algorithm)?;
        Ok(plan.pending.iter().map(|update| update.version).collect())
    }

    /// Bring the store up to date with `updates`, stopping after `target_version` if given.
    pub fn run<S: VersionStore>(
        &self,
        store: &mut S,
        updates: &[Update],
        target_version: Option<i64>,
    ) -> Result<Outcome, Error> {
        let Some(_guard) = RunGuard::try_acquire(&self.active) else {
            #[cfg(feature = "tracing")]
            tracing::info!("Updater is already running, skipping updates");
            return Ok(Outcome::AlreadyRunning);
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            updates = updates.len(),
            target_version = ?target_version,
            table = %self.schema_version_table_name,
            "Initializing schema updates"
        );

        validate_table_name(&self.schema_version_table_name)?;
        validate_updates(updates)?;

        let schema_version_table_existed = store.ensure_table()?;
        #[cfg(feature = "tracing")]
        tracing::info!(
            existed = schema_version_table_existed,
            "Schema version table initialized"
        );

        let recorded = store.read_all()?;
        let plan = reconcile(&recorded, updates, self.checksum_algorithm)?;
        let previous_version = plan.current_version;

        // a target the schema has already reached needs no matching update
        if let Some(target) = target_version {
            if target > previous_version && !updates.iter().any(|update| update.version == target)
            {
                return Err(Error::UnknownTargetVersion(target));
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            current_version = previous_version,
            "Schema is currently at version {}",
            previous_version
        );

        let pending = plan
            .pending
            .into_iter()
            .take_while(|update| target_version.map_or(true, |target| update.version <= target))
            .collect::<Vec<_>>();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            pending = ?pending.iter().map(|update| update.version).collect::<Vec<_>>(),
            "Considering updates to apply"
        );

        // Every update applied by this call gets the same timestamp
        let applied_at = Utc::now();
        let mut applied = Vec::with_capacity(pending.len());
        let mut final_version = previous_version;

        for update in pending {
            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!("update_apply", version = update.version).entered();

            if let Some(ref callback) = self.on_update_start {
                callback(update.version);
            }

            let started = Instant::now();
            let checksum = self.checksum_algorithm.compute(&update.script);

            if let Err(error) = store.apply(update, checksum, applied_at) {
                let error = match error {
                    error @ Error::Apply { .. } => error,
                    other => Error::apply(update.version, ApplyStage::Transaction, other),
                };

                #[cfg(feature = "tracing")]
                tracing::error!(error = %error, "Update failed and was rolled back");

                if let Some(ref callback) = self.on_update_error {
                    callback(update.version, &error);
                }
                return Err(error);
            }

            let duration = started.elapsed();

            #[cfg(feature = "tracing")]
            tracing::info!(
                duration_ms = duration.as_millis(),
                "Successfully updated database to version {}",
                update.version
            );

            if let Some(ref callback) = self.on_update_complete {
                callback(update.version, duration);
            }

            applied.push(update.version);
            final_version = update.version;
        }

        #[cfg(feature = "tracing")]
        {
            if applied.is_empty() {
                tracing::info!("No updates found! Schema is up to date");
            } else {
                tracing::info!(
                    "Schema updated from version {} to {}",
                    previous_version,
                    final_version
                );
            }
        }

        Ok(Outcome::Completed(UpdateReport {
            schema_version_table_existed,
            previous_version,
            final_version,
            applied,
        }))
    }
}
