//! Counters returned by a pipeline run.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::migration::MigrationCounts;
use crate::reconcile::Outcome;
use crate::verify::VerificationReport;

/// Outcome counts for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Media files found under the root
    pub discovered: usize,
    pub created: usize,
    pub updated: usize,
    pub duplicates_removed: usize,
    pub duplicates_kept: usize,
    pub orphans_recovered: usize,
    /// Candidates rejected with an identity conflict
    pub conflicts: usize,
    /// Candidates that did not decode as their media kind
    pub format_errors: usize,
    pub other_errors: usize,
    pub migration: MigrationCounts,
    pub verification: Option<VerificationReport>,
    /// The run stopped early on request
    pub cancelled: bool,
}

impl PipelineStats {
    pub fn record_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::DuplicateRemoved => self.duplicates_removed += 1,
            Outcome::DuplicateKept => self.duplicates_kept += 1,
            Outcome::OrphanRecovered => self.orphans_recovered += 1,
        }
    }

    pub fn record_error(&mut self, error: &Error) {
        if error.is_identity_conflict() {
            self.conflicts += 1;
        } else if error.is_format() {
            self.format_errors += 1;
        } else {
            self.other_errors += 1;
        }
    }

    pub fn record(&mut self, result: &Result<Outcome>) {
        match result {
            Ok(outcome) => self.record_outcome(*outcome),
            Err(e) => self.record_error(e),
        }
    }

    /// Candidates that reached a terminal outcome.
    pub fn reconciled(&self) -> usize {
        self.created
            + self.updated
            + self.duplicates_removed
            + self.duplicates_kept
            + self.orphans_recovered
    }

    pub fn errors(&self) -> usize {
        self.conflicts + self.format_errors + self.other_errors
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files: {} created, {} updated, {} duplicates removed, {} duplicates kept, \
             {} orphans recovered, {} conflicts, {} format errors, {} other errors",
            self.discovered,
            self.created,
            self.updated,
            self.duplicates_removed,
            self.duplicates_kept,
            self.orphans_recovered,
            self.conflicts,
            self.format_errors,
            self.other_errors,
        )?;
        if self.migration.total() > 0 {
            write!(
                f,
                "; migration: {} migrated, {} preserved, {} id-matched",
                self.migration.migrated, self.migration.preserved, self.migration.id_matched
            )?;
        }
        if let Some(report) = &self.verification {
            write!(f, "; verified {} records, {} missing", report.checked, report.missing)?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let mut stats = PipelineStats::default();
        stats.record_error(&Error::IdentityConflict {
            id: 1,
            stored_hash: "a".into(),
            candidate_hash: "b".into(),
        });
        stats.record_error(&Error::format("/x.jpg", "bad").context("hashing"));
        stats.record_error(&Error::WorkerUnavailable);
        stats.record(&Ok(Outcome::Created));

        assert_eq!((stats.conflicts, stats.format_errors, stats.other_errors), (1, 1, 1));
        assert_eq!(stats.errors(), 3);
        assert_eq!(stats.reconciled(), 1);
    }

    #[test]
    fn test_serializes_to_json() {
        let stats = PipelineStats {
            created: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["created"], 2);
        assert_eq!(json["migration"]["migrated"], 0);
        assert!(json["verification"].is_null());
    }
}
