//! Legacy migration pre-pass.
//!
//! Older releases embedded fingerprints in filenames (`_hash_`, `_hash1_`,
//! `_hash2_`). This pass strips those markers, renames the file without
//! clobbering anything, and reconciles the result. A record that named the
//! old file is carried over to the new name, or merged into the record that
//! already owns the content. If reconciliation fails the rename is undone.
//!
//! | Filename carries | Action | State |
//! |---|---|---|
//! | trusted marker | strip, rename, reconcile with the marker hash | [`MigrationState::Preserved`] |
//! | legacy marker | strip, rename, reconcile with a fresh fingerprint | [`MigrationState::Migrated`] |
//! | id marker only | reconcile by id | [`MigrationState::IdMatched`] |
//! | nothing, but recorded | left for the main pass | [`MigrationState::DbMatched`] |
//! | nothing | left for the main pass | [`MigrationState::Skipped`] |

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result, ResultExt};
use crate::identity::{self, ExtractedIdentity, HashSignal};
use crate::reconcile::{Candidate, Outcome, Reconciler};
use crate::store::IdentityStore;

/// Give up looking for a free `_N` suffix after this many attempts.
const MAX_SUFFIX: usize = 10_000;

/// Terminal state of one file in the migration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Migrated,
    Preserved,
    DbMatched,
    IdMatched,
    Skipped,
}

impl MigrationState {
    /// Whether the file was reconciled here. Unsettled files go on to the
    /// main pass.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Migrated | Self::Preserved | Self::IdMatched)
    }
}

/// Result of migrating one file.
#[derive(Debug, Clone)]
pub struct Migration {
    pub state: MigrationState,
    /// Where the file lives now
    pub path: PathBuf,
    /// Reconciliation outcome for settled files
    pub outcome: Option<Outcome>,
}

/// Per-state counters for a migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationCounts {
    pub migrated: usize,
    pub preserved: usize,
    pub db_matched: usize,
    pub id_matched: usize,
    pub skipped: usize,
}

impl MigrationCounts {
    pub fn record(&mut self, state: MigrationState) {
        match state {
            MigrationState::Migrated => self.migrated += 1,
            MigrationState::Preserved => self.preserved += 1,
            MigrationState::DbMatched => self.db_matched += 1,
            MigrationState::IdMatched => self.id_matched += 1,
            MigrationState::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.migrated + self.preserved + self.db_matched + self.id_matched + self.skipped
    }
}

/// Runs the migration steps for individual files.
#[derive(Clone)]
pub struct Migrator {
    engine: Reconciler,
    owner_id: Option<i64>,
}

impl Migrator {
    pub fn new(engine: Reconciler, owner_id: Option<i64>) -> Self {
        Self { engine, owner_id }
    }

    /// Migrate one discovered file.
    pub async fn migrate_file(&self, path: &Path) -> Result<Migration> {
        let candidate = Candidate::from_path(path, self.owner_id)?;
        let ExtractedIdentity { id, hash } = candidate.identity.clone();

        let (state, signal) = match hash {
            HashSignal::Trusted(hash) => (MigrationState::Preserved, HashSignal::Trusted(hash)),
            // Deprecated fingerprints are never carried over
            HashSignal::Legacy { .. } => (MigrationState::Migrated, HashSignal::None),
            HashSignal::None if id.is_some() => {
                let outcome = self.engine.reconcile(&candidate).await?;
                return Ok(Migration {
                    state: MigrationState::IdMatched,
                    path: candidate.path,
                    outcome: Some(outcome),
                });
            }
            HashSignal::None => {
                let state = match self.engine.store().find_by_filename(&candidate.filename).await? {
                    Some(record) if record.is_downloaded => MigrationState::DbMatched,
                    _ => MigrationState::Skipped,
                };
                return Ok(Migration {
                    state,
                    path: candidate.path,
                    outcome: None,
                });
            }
        };

        let Some(stripped) = identity::strip_hash_markers(&candidate.filename) else {
            return Err(Error::format(path, "hash marker could not be stripped"));
        };
        let new_path = rename_free(path.to_path_buf(), stripped)
            .await
            .with_context(format!("stripping marker from {}", path.display()))?;
        self.engine.files().rename(path, &new_path);

        // The record naming the old filename follows the file inside the
        // reconcile decision, so it is updated or merged in one step.
        let migrated = Candidate::from_path(&new_path, self.owner_id)?
            .with_identity(ExtractedIdentity { id, hash: signal })
            .renamed_from(candidate.filename.clone());
        let outcome = match self.engine.reconcile(&migrated).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.restore_name(&new_path, path).await;
                return Err(e);
            }
        };

        tracing::info!(
            target: "migration",
            from = %candidate.filename,
            to = %new_path.display(),
            state = ?state,
            outcome = %outcome,
            "Stripped hash marker"
        );

        Ok(Migration {
            state,
            path: new_path,
            outcome: Some(outcome),
        })
    }

    /// Undo a marker-stripping rename after the file failed to reconcile, so
    /// any record still naming the original file stays accurate.
    async fn restore_name(&self, current: &Path, original: &Path) {
        if !current.exists() {
            return;
        }
        let (from, to) = (current.to_path_buf(), original.to_path_buf());
        let restored = tokio::task::spawn_blocking(move || rename_no_clobber(&from, &to))
            .await
            .map_err(io::Error::other)
            .and_then(|result| result);
        match restored {
            Ok(()) => self.engine.files().rename(current, original),
            Err(e) => tracing::warn!(
                target: "migration",
                path = %current.display(),
                error = %e,
                "Could not restore original name"
            ),
        }
    }
}

/// Rename `from` to `name` in the same directory, appending `_1`, `_2`, ...
/// to the stem until a free name is found. Never overwrites.
pub async fn rename_free(from: PathBuf, name: String) -> Result<PathBuf> {
    let joined = tokio::task::spawn_blocking(move || -> io::Result<PathBuf> {
        let dir = from.parent().map(Path::to_path_buf).unwrap_or_default();
        for n in 0..MAX_SUFFIX {
            let target = dir.join(suffixed(&name, n));
            if target.symlink_metadata().is_ok() {
                continue;
            }
            match rename_no_clobber(&from, &target) {
                Ok(()) => return Ok(target),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {name} in {}", dir.display()),
        ))
    })
    .await
    .map_err(io::Error::other)?;

    Ok(joined?)
}

/// `name` with `_n` appended to the stem (`n == 0` leaves it unchanged).
pub fn suffixed(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{name}_{n}"),
    }
}

/// Move `from` to `to`, failing with `AlreadyExists` instead of replacing
/// an existing file.
///
/// A hard link is atomic and refuses to overwrite; filesystems without
/// hard links fall back to an existence check plus rename.
fn rename_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::hard_link(from, to) {
        Ok(()) => std::fs::remove_file(from),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            tracing::debug!(target: "migration", error = %e, "Hard link failed, renaming");
            if to.symlink_metadata().is_ok() {
                return Err(io::ErrorKind::AlreadyExists.into());
            }
            std::fs::rename(from, to)
        }
    }
}
