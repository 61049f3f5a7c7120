//! Reconciliation of recorded updates against a requested update set.

use crate::checksum::ChecksumAlgorithm;
use crate::error::Error;
use crate::{AppliedUpdate, Update};
use std::collections::{BTreeSet, HashMap};

/// What a run has to do after a successful reconciliation.
#[derive(Debug, PartialEq)]
pub(crate) struct Plan<'u> {
    /// Highest recorded version, 0 for an empty table.
    pub current_version: i64,
    /// Updates above `current_version`, ascending by version.
    pub pending: Vec<&'u Update>,
}

/// Reject update sets with duplicate or non-positive versions.
pub(crate) fn validate_updates(updates: &[Update]) -> Result<(), Error> {
    let mut versions: Vec<i64> = updates.iter().map(|u| u.version).collect();
    versions.sort_unstable();

    for (i, &version) in versions.iter().enumerate() {
        if version <= 0 {
            return Err(Error::NonPositiveVersion(version));
        }
        if i > 0 && versions[i - 1] == version {
            return Err(Error::DuplicateVersion(version));
        }
    }
    Ok(())
}

/// Compare the recorded rows with the requested update set.
///
/// Every update at or below the current version must have been recorded, every recorded
/// version must still be requested, and each recorded checksum must match its script.
pub(crate) fn reconcile<'u>(
    recorded: &[AppliedUpdate],
    updates: &'u [Update],
    algorithm: ChecksumAlgorithm,
) -> Result<Plan<'u>, Error> {
    let current_version = recorded.iter().map(|row| row.version).max().unwrap_or(0);

    let applied: BTreeSet<i64> = recorded.iter().map(|row| row.version).collect();
    let proposed: HashMap<i64, &Update> = updates
        .iter()
        .filter(|update| update.version <= current_version)
        .map(|update| (update.version, update))
        .collect();
    let proposed_versions: BTreeSet<i64> = proposed.keys().copied().collect();

    let extra_in_db: Vec<i64> = applied.difference(&proposed_versions).copied().collect();
    let extra_in_request: Vec<i64> = proposed_versions.difference(&applied).copied().collect();

    if !extra_in_db.is_empty() || !extra_in_request.is_empty() {
        let error = Error::Divergence {
            extra_in_db,
            extra_in_request,
        };
        #[cfg(feature = "tracing")]
        tracing::error!(error = %error, "Recorded and requested updates diverge");
        return Err(error);
    }

    let mut rows: Vec<&AppliedUpdate> = recorded.iter().collect();
    rows.sort_by_key(|row| row.version);
    for row in rows {
        // present: the divergence check guarantees every recorded version is proposed
        let update = proposed[&row.version];
        let actual = algorithm.compute(&update.script);
        if actual != row.checksum {
            let error = Error::ChecksumMismatch {
                version: row.version,
                expected: row.checksum,
                actual,
            };
            #[cfg(feature = "tracing")]
            tracing::error!(error = %error, "Checksum mismatch");
            return Err(error);
        }
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Checksum is valid for script with version {}",
            update.version
        );
    }

    #[cfg(feature = "tracing")]
    {
        if !recorded.is_empty() {
            tracing::info!("All checksums are valid");
        }
    }

    let mut pending: Vec<&Update> = updates
        .iter()
        .filter(|update| update.version > current_version)
        .collect();
    pending.sort_by_key(|update| update.version);

    Ok(Plan {
        current_version,
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;

    fn row(update: &Update) -> AppliedUpdate {
        AppliedUpdate {
            version: update.version,
            checksum: i64::from(checksum(&update.script)),
            applied_at: None,
        }
    }

    fn updates() -> Vec<Update> {
        vec![
            Update::new(
                201810230925,
                "CREATE TABLE IF NOT EXISTS Person (id INTEGER PRIMARY KEY, firstname VARCHAR (255))",
            ),
            Update::new(
                201810230926,
                "CREATE TABLE IF NOT EXISTS Car (id INTEGER PRIMARY KEY, model VARCHAR (255))",
            ),
            Update::new(
                201810230927,
                "CREATE TABLE IF NOT EXISTS Insurance (id INTEGER PRIMARY KEY, extid VARCHAR (255))",
            ),
            Update::new(
                201810230928,
                "INSERT INTO Insurance(id, extid) VALUES(200, 'abcdefghijklmn')",
            ),
        ]
    }

    fn pending_versions(plan: &Plan) -> Vec<i64> {
        plan.pending.iter().map(|update| update.version).collect()
    }

    #[test]
    fn empty_table_makes_everything_pending_in_order() {
        let mut shuffled = updates();
        shuffled.reverse();
        let plan = reconcile(&[], &shuffled, ChecksumAlgorithm::JavaHash).unwrap();
        assert_eq!(plan.current_version, 0);
        assert_eq!(
            pending_versions(&plan),
            vec![201810230925, 201810230926, 201810230927, 201810230928]
        );
    }

    #[test]
    fn empty_update_set_on_empty_table_is_a_no_op() {
        let plan = reconcile(&[], &[], ChecksumAlgorithm::JavaHash).unwrap();
        assert_eq!(plan.current_version, 0);
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn fully_applied_set_has_nothing_pending() {
        let updates = updates();
        let recorded: Vec<_> = updates.iter().map(row).collect();
        let plan = reconcile(&recorded, &updates, ChecksumAlgorithm::JavaHash).unwrap();
        assert_eq!(plan.current_version, 201810230928);
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn only_updates_above_current_version_are_pending() {
        let updates = updates();
        let recorded: Vec<_> = updates[..2].iter().map(row).collect();
        let plan = reconcile(&recorded, &updates, ChecksumAlgorithm::JavaHash).unwrap();
        assert_eq!(plan.current_version, 201810230926);
        assert_eq!(pending_versions(&plan), vec![201810230927, 201810230928]);
    }

    #[test]
    fn recorded_updates_missing_from_request() {
        let updates = updates();
        let recorded: Vec<_> = updates.iter().map(row).collect();
        let request = vec![updates[0].clone(), updates[2].clone()];
        let error = reconcile(&recorded, &request, ChecksumAlgorithm::JavaHash).unwrap_err();
        assert_eq!(
            error,
            Error::Divergence {
                extra_in_db: vec![201810230926, 201810230928],
                extra_in_request: vec![],
            }
        );
    }

    #[test]
    fn requested_updates_missing_from_database() {
        let updates = updates();
        let recorded = vec![row(&updates[0]), row(&updates[2])];
        let error = reconcile(&recorded, &updates, ChecksumAlgorithm::JavaHash).unwrap_err();
        assert_eq!(
            error,
            Error::Divergence {
                extra_in_db: vec![],
                extra_in_request: vec![201810230926],
            }
        );
    }

    #[test]
    fn update_from_the_past_is_divergence() {
        let updates = updates();
        let recorded: Vec<_> = updates.iter().map(row).collect();
        let mut request = updates.clone();
        request.push(Update::new(
            201704121212,
            "CREATE TABLE IF NOT EXISTS Dog (id INTEGER PRIMARY KEY, extid VARCHAR (255))",
        ));
        let error = reconcile(&recorded, &request, ChecksumAlgorithm::JavaHash).unwrap_err();
        assert_eq!(
            error,
            Error::Divergence {
                extra_in_db: vec![],
                extra_in_request: vec![201704121212],
            }
        );
    }

    #[test]
    fn both_sides_are_reported_together() {
        let updates = updates();
        let recorded = vec![row(&updates[0]), row(&updates[1]), row(&updates[3])];
        let request = vec![updates[0].clone(), updates[2].clone(), updates[3].clone()];
        let error = reconcile(&recorded, &request, ChecksumAlgorithm::JavaHash).unwrap_err();
        assert_eq!(
            error,
            Error::Divergence {
                extra_in_db: vec![201810230926],
                extra_in_request: vec![201810230927],
            }
        );
    }

    #[test]
    fn edited_script_is_checksum_mismatch() {
        let updates = updates();
        let recorded: Vec<_> = updates.iter().map(row).collect();
        let mut request = updates.clone();
        request[2].script =
            "CREATE TABLE IF NOT EXISTS Inrusance (id INTEGER PRIMARY KEY, extid VARCHAR (255))"
                .to_string();
        let error = reconcile(&recorded, &request, ChecksumAlgorithm::JavaHash).unwrap_err();
        assert_eq!(
            error,
            Error::ChecksumMismatch {
                version: 201810230927,
                expected: -1043481897,
                actual: 2015242007,
            }
        );
    }

    #[test]
    fn lowest_mismatching_version_is_reported() {
        let updates = updates();
        let recorded: Vec<_> = updates.iter().map(row).collect();
        let mut request = updates.clone();
        request[3].script.push(' ');
        request[1].script.push(' ');
        let error = reconcile(&recorded, &request, ChecksumAlgorithm::JavaHash).unwrap_err();
        assert!(matches!(
            error,
            Error::ChecksumMismatch {
                version: 201810230926,
                ..
            }
        ));
    }

    #[test]
    fn checksums_use_configured_algorithm() {
        let updates = updates();
        let recorded: Vec<_> = updates.iter().map(row).collect();
        let error = reconcile(&recorded, &updates, ChecksumAlgorithm::Sha256).unwrap_err();
        assert!(matches!(
            error,
            Error::ChecksumMismatch {
                version: 201810230925,
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_duplicates() {
        let updates = vec![
            Update::new(2, "a"),
            Update::new(1, "b"),
            Update::new(2, "c"),
        ];
        assert_eq!(validate_updates(&updates), Err(Error::DuplicateVersion(2)));
    }

    #[test]
    fn validate_rejects_non_positive_versions() {
        let updates = vec![Update::new(1, "a"), Update::new(0, "b")];
        assert_eq!(validate_updates(&updates), Err(Error::NonPositiveVersion(0)));
        let updates = vec![Update::new(-5, "a")];
        assert_eq!(validate_updates(&updates), Err(Error::NonPositiveVersion(-5)));
    }

    #[test]
    fn validate_accepts_sparse_versions() {
        let updates = vec![Update::new(201810230925, "a"), Update::new(7, "b")];
        assert_eq!(validate_updates(&updates), Ok(()));
    }
}
