//! Reconciliation engine: decides what a candidate file is.
//!
//! Every candidate resolves to exactly one [`Outcome`] or an error:
//!
//! ```text
//!            ┌─ id known ──────▶ trust / adopt / verify against stored hash
//! candidate ─┤
//!            └─ id unknown ────▶ settle by hash ─┬─ no record ─▶ Created
//!               or no id                         ├─ same file  ─▶ Updated
//!                                                ├─ file gone  ─▶ OrphanRecovered
//!                                                └─ file there ─▶ Duplicate{Removed,Kept}
//! ```
//!
//! Concurrency is handled optimistically. Every write is checked by the
//! store's UNIQUE constraints; when a concurrent task wins a race the write
//! fails with [`Error::StoreConflict`] and the decision is re-run from a
//! fresh read. The first writer is canonical. A candidate file is only
//! deleted after the store write that confirms its surviving twin.

mod file_index;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{Error, Result, ResultExt};
use crate::hasher::HashWorkers;
use crate::identity::{self, ExtractedIdentity};
use crate::model::{IdentityRecord, MediaKind};
use crate::store::IdentityStore;

pub use file_index::FileIndex;

/// Decisions per candidate before a store conflict is surfaced.
pub const MAX_ATTEMPTS: usize = 3;

/// Terminal result of reconciling one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// New content; a record was inserted.
    Created,
    /// The candidate is the file an existing record describes.
    Updated,
    /// Known content whose file still exists; the candidate was deleted.
    DuplicateRemoved,
    /// Known content whose file still exists; the candidate was left alone.
    DuplicateKept,
    /// Known content whose file had gone; the record now points here.
    OrphanRecovered,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::DuplicateRemoved => "duplicate_removed",
            Self::DuplicateKept => "duplicate_kept",
            Self::OrphanRecovered => "orphan_recovered",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a candidate that duplicates an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Delete,
    Keep,
}

/// A file to reconcile, with the identity signals it arrived with.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    /// Bare filename, as stored in records
    pub filename: String,
    pub identity: ExtractedIdentity,
    pub kind: MediaKind,
    pub owner_id: Option<i64>,
    pub mimetype: Option<String>,
    /// Name the file had before a rename, whose record it inherits
    pub former_filename: Option<String>,
}

impl Candidate {
    /// Build a candidate from a path, reading identity markers from its
    /// filename.
    pub fn from_path(path: impl Into<PathBuf>, owner_id: Option<i64>) -> Result<Self> {
        let path = path.into();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::format(&path, "file name is not valid UTF-8"))?;
        let kind = MediaKind::from_path(&path)
            .ok_or_else(|| Error::format(&path, "unsupported media type"))?;

        Ok(Self {
            identity: identity::extract(&filename),
            mimetype: MediaKind::mimetype(&path).map(str::to_string),
            path,
            filename,
            kind,
            owner_id,
            former_filename: None,
        })
    }

    /// Replace the identity signals, e.g. with an id supplied by the
    /// download layer or a hash signal decided by migration.
    pub fn with_identity(mut self, identity: ExtractedIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.identity.id = Some(id);
        self
    }

    /// Mark the candidate as the renamed file previously called `filename`.
    /// A record naming the old filename is carried over to this one.
    pub fn renamed_from(mut self, filename: impl Into<String>) -> Self {
        self.former_filename = Some(filename.into());
        self
    }
}

/// The reconciliation engine. Cheap to clone; clones share the store,
/// workers and file index.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn IdentityStore>,
    workers: HashWorkers,
    files: FileIndex,
    policy: DuplicatePolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn IdentityStore>, workers: HashWorkers, files: FileIndex) -> Self {
        Self {
            store,
            workers,
            files,
            policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    pub fn files(&self) -> &FileIndex {
        &self.files
    }

    /// Reconcile one candidate against the store.
    ///
    /// The candidate's fingerprint is computed at most once, and never when
    /// it carries a trusted hash.
    pub async fn reconcile(&self, candidate: &Candidate) -> Result<Outcome> {
        let fingerprint = OnceCell::new();
        let mut attempt = 1;

        let outcome = loop {
            match self.decide(candidate, &fingerprint).await {
                Err(e) if e.is_store_conflict() && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(
                        target: "reconcile",
                        file = %candidate.filename,
                        attempt,
                        error = %e,
                        "Lost a write race, re-reading"
                    );
                    attempt += 1;
                }
                result => break result?,
            }
        };

        if outcome == Outcome::DuplicateRemoved {
            tokio::fs::remove_file(&candidate.path)
                .await
                .with_context(format!("removing duplicate {}", candidate.path.display()))?;
            self.files.remove(&candidate.path);
        }

        tracing::debug!(
            target: "reconcile",
            file = %candidate.filename,
            outcome = %outcome,
            "Reconciled"
        );
        Ok(outcome)
    }

    async fn decide(&self, c: &Candidate, fingerprint: &OnceCell<String>) -> Result<Outcome> {
        if let Some(former) = &c.former_filename
            && let Some(prior) = self.store.find_by_filename(former).await?
            && prior
                .id
                .is_none_or(|prior_id| c.identity.id.is_none_or(|id| id == prior_id))
        {
            return self.carry_over(c, fingerprint, prior).await;
        }

        match c.identity.id {
            Some(id) => match self.store.find_by_id(id).await? {
                Some(record) => self.reconcile_known_id(c, fingerprint, record).await,
                None => self.settle_by_hash(c, fingerprint, Some(id)).await,
            },
            None => self.settle_by_hash(c, fingerprint, None).await,
        }
    }

    /// The candidate's fingerprint, computed once. A trusted marker is
    /// returned as is.
    async fn candidate_hash(&self, c: &Candidate, fingerprint: &OnceCell<String>) -> Result<String> {
        fingerprint
            .get_or_try_init(|| async {
                match c.identity.hash.trusted_hash() {
                    Some(hash) => Ok(hash.to_string()),
                    None => self.workers.fingerprint(&c.path, c.kind).await,
                }
            })
            .await
            .cloned()
    }

    async fn reconcile_known_id(
        &self,
        c: &Candidate,
        fingerprint: &OnceCell<String>,
        mut record: IdentityRecord,
    ) -> Result<Outcome> {
        let Some(previous) = record.local_filename.clone() else {
            // Known id, never downloaded: adopt this file
            if record.content_hash.is_none() {
                record.content_hash = Some(self.candidate_hash(c, fingerprint).await?);
            }
            record.local_filename = Some(c.filename.clone());
            record.is_downloaded = true;
            fill_descriptive(&mut record, c);
            return self.persist(c, record, Outcome::Updated).await;
        };

        if previous == c.filename {
            let mut changed = !record.is_downloaded;
            if record.content_hash.is_none() {
                record.content_hash = Some(self.candidate_hash(c, fingerprint).await?);
                changed = true;
            }
            record.is_downloaded = true;
            changed |= fill_descriptive(&mut record, c);
            if !changed {
                return Ok(Outcome::Updated);
            }
            return self.persist(c, record, Outcome::Updated).await;
        }

        // Same id under another filename: the content must match.
        let candidate_hash = self.candidate_hash(c, fingerprint).await?;
        let previous_path = self.files.locate(&previous, &c.path);

        let stored_hash = match (record.content_hash.clone(), previous_path.as_deref()) {
            (Some(hash), _) => hash,
            (None, None) => {
                tracing::info!(
                    target: "reconcile",
                    id = record.id,
                    from = %previous,
                    to = %c.filename,
                    "Recovered unhashed record"
                );
                record.local_filename = Some(c.filename.clone());
                record.content_hash = Some(candidate_hash);
                record.is_downloaded = true;
                fill_descriptive(&mut record, c);
                return self.persist(c, record, Outcome::OrphanRecovered).await;
            }
            (None, Some(path)) => {
                let kind = MediaKind::from_path(path).unwrap_or(c.kind);
                self.workers.fingerprint(path, kind).await?
            }
        };

        if stored_hash != candidate_hash {
            tracing::warn!(
                target: "reconcile",
                id = record.id,
                stored = %stored_hash,
                candidate = %candidate_hash,
                file = %c.filename,
                "Identity conflict"
            );
            return Err(Error::IdentityConflict {
                id: record.id.unwrap_or_default(),
                stored_hash,
                candidate_hash,
            });
        }

        match previous_path {
            Some(_) => {
                let changed = record.content_hash.is_none() || !record.is_downloaded;
                if changed {
                    record.content_hash = Some(stored_hash);
                    record.is_downloaded = true;
                    return self.persist(c, record, self.duplicate_outcome()).await;
                }
                Ok(self.duplicate_outcome())
            }
            None => {
                tracing::info!(
                    target: "reconcile",
                    id = record.id,
                    from = %previous,
                    to = %c.filename,
                    "Recovered orphaned record"
                );
                record.local_filename = Some(c.filename.clone());
                record.is_downloaded = true;
                fill_descriptive(&mut record, c);
                self.persist(c, record, Outcome::OrphanRecovered).await
            }
        }
    }

    /// Move the record of a renamed file over to the new name. If the
    /// content turns out to belong to another record, `prior` is folded into
    /// that one instead.
    async fn carry_over(
        &self,
        c: &Candidate,
        fingerprint: &OnceCell<String>,
        mut prior: IdentityRecord,
    ) -> Result<Outcome> {
        let hash = self.candidate_hash(c, fingerprint).await?;

        let owner = self.store.find_by_hash(&hash).await?;
        if let Some(canonical) = owner
            && canonical.row_id != prior.row_id
        {
            return self.fold_into(c, canonical, prior).await;
        }

        prior.local_filename = Some(c.filename.clone());
        prior.content_hash = Some(hash);
        prior.id = prior.id.or(c.identity.id);
        prior.is_downloaded = true;
        fill_descriptive(&mut prior, c);
        self.persist(c, prior, Outcome::Updated).await
    }

    /// Establish identity by fingerprint alone, attaching `id` when given.
    async fn settle_by_hash(
        &self,
        c: &Candidate,
        fingerprint: &OnceCell<String>,
        id: Option<i64>,
    ) -> Result<Outcome> {
        let hash = self.candidate_hash(c, fingerprint).await?;

        let Some(mut record) = self.store.find_by_hash(&hash).await? else {
            // A record that names this file but lost (or never had) its hash
            if let Some(mut named) = self.store.find_by_filename(&c.filename).await?
                && named.content_hash.is_none()
                && named.id.is_none_or(|existing| Some(existing) == id)
            {
                named.content_hash = Some(hash);
                named.id = named.id.or(id);
                named.is_downloaded = true;
                fill_descriptive(&mut named, c);
                return self.persist(c, named, Outcome::Updated).await;
            }

            let mut record = IdentityRecord::downloaded(c.filename.clone(), hash);
            record.id = id;
            fill_descriptive(&mut record, c);
            let record = self.store.insert(record).await?;
            self.files.insert(&c.path);
            tracing::debug!(
                target: "reconcile",
                row_id = record.row_id,
                file = %c.filename,
                "Created record"
            );
            return Ok(Outcome::Created);
        };

        let mut changed = false;
        if let Some(id) = id {
            match record.id {
                None => {
                    record.id = Some(id);
                    changed = true;
                }
                Some(existing) if existing != id => {
                    tracing::warn!(
                        target: "reconcile",
                        candidate_id = id,
                        record_id = existing,
                        file = %c.filename,
                        "Same content published under two ids"
                    );
                }
                Some(_) => {}
            }
        }

        if record.has_filename(&c.filename) {
            changed |= !record.is_downloaded;
            record.is_downloaded = true;
            changed |= fill_descriptive(&mut record, c);
            if changed {
                self.store.update(&record).await?;
            }
            return Ok(Outcome::Updated);
        }

        let existing = record
            .local_filename
            .as_deref()
            .and_then(|name| self.files.locate(name, &c.path));

        match existing {
            Some(_) => {
                if changed || !record.is_downloaded {
                    record.is_downloaded = true;
                    self.store.update(&record).await?;
                }
                Ok(self.duplicate_outcome())
            }
            None => {
                let outcome = match &record.local_filename {
                    Some(previous) => {
                        tracing::info!(
                            target: "reconcile",
                            from = %previous,
                            to = %c.filename,
                            "Recovered orphaned record"
                        );
                        Outcome::OrphanRecovered
                    }
                    None => Outcome::Updated,
                };
                record.local_filename = Some(c.filename.clone());
                record.is_downloaded = true;
                fill_descriptive(&mut record, c);
                self.store.update(&record).await?;
                Ok(outcome)
            }
        }
    }

    /// Write `record`. When its hash already belongs to another record,
    /// that record is canonical and `record` is folded into it.
    async fn persist(&self, c: &Candidate, record: IdentityRecord, outcome: Outcome) -> Result<Outcome> {
        let err = match self.store.update(&record).await {
            Ok(()) => return Ok(outcome),
            Err(e) if e.is_store_conflict() => e,
            Err(e) => return Err(e),
        };

        let Some(hash) = record.content_hash.as_deref() else {
            return Err(err);
        };
        let owner = self.store.find_by_hash(hash).await?;
        match owner {
            Some(canonical) if canonical.row_id != record.row_id => {
                self.fold_into(c, canonical, record).await
            }
            // The conflict was on something else; start over.
            _ => Err(err),
        }
    }

    async fn fold_into(
        &self,
        c: &Candidate,
        mut canonical: IdentityRecord,
        mut superseded: IdentityRecord,
    ) -> Result<Outcome> {
        let outcome = if canonical.has_filename(&c.filename) {
            Outcome::Updated
        } else if canonical
            .local_filename
            .as_deref()
            .and_then(|name| self.files.locate(name, &c.path))
            .is_some()
        {
            self.duplicate_outcome()
        } else {
            canonical.local_filename = Some(c.filename.clone());
            Outcome::OrphanRecovered
        };
        canonical.is_downloaded = true;
        fill_descriptive(&mut canonical, c);

        match (canonical.id, superseded.id) {
            (Some(kept), Some(lost)) if kept != lost => {
                // Two platform ids for one content; the id record keeps its
                // id but gives up any claim on a file.
                tracing::warn!(
                    target: "reconcile",
                    kept,
                    lost,
                    file = %c.filename,
                    "Same content published under two ids"
                );
                superseded.local_filename = None;
                superseded.content_hash = None;
                superseded.is_downloaded = false;
                self.store.update(&superseded).await?;
                self.store.update(&canonical).await?;
            }
            (_, lost) => {
                canonical.id = canonical.id.or(lost);
                tracing::info!(
                    target: "reconcile",
                    canonical = canonical.row_id,
                    superseded = superseded.row_id,
                    "Merged records"
                );
                self.store.merge(&canonical, superseded.row_id).await?;
            }
        }

        Ok(outcome)
    }

    fn duplicate_outcome(&self) -> Outcome {
        match self.policy {
            DuplicatePolicy::Delete => Outcome::DuplicateRemoved,
            DuplicatePolicy::Keep => Outcome::DuplicateKept,
        }
    }
}

/// Fill owner and mimetype from the candidate where the record lacks them.
fn fill_descriptive(record: &mut IdentityRecord, c: &Candidate) -> bool {
    let mut changed = false;
    if record.owner_id.is_none() && c.owner_id.is_some() {
        record.owner_id = c.owner_id;
        changed = true;
    }
    if record.mimetype.is_none() && c.mimetype.is_some() {
        record.mimetype = c.mimetype.clone();
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::HashSignal;
    use crate::store::SqliteStore;
    use crate::test_utils::{ContentsHasher, temp_store};
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    struct Harness {
        engine: Reconciler,
        store: Arc<SqliteStore>,
        hasher: Arc<ContentsHasher>,
        root: TempDir,
        _db: TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_policy(DuplicatePolicy::Delete).await
        }

        async fn with_policy(policy: DuplicatePolicy) -> Self {
            let (store, db) = temp_store().await;
            let store = Arc::new(store);
            let hasher = Arc::new(ContentsHasher::default());
            let workers = HashWorkers::spawn(hasher.clone(), 2).unwrap();
            let engine = Reconciler::new(store.clone(), workers, FileIndex::new()).with_policy(policy);
            Self {
                engine,
                store,
                hasher,
                root: tempdir().unwrap(),
                _db: db,
            }
        }

        /// Write a file whose stub fingerprint is `hash` and index it.
        fn file(&self, name: &str, hash: &str) -> PathBuf {
            let path = self.root.path().join(name);
            std::fs::write(&path, hash).unwrap();
            self.engine.files().insert(&path);
            path
        }

        fn candidate(&self, path: &Path) -> Candidate {
            Candidate::from_path(path, Some(1)).unwrap()
        }

        async fn reconcile(&self, path: &Path) -> Result<Outcome> {
            self.engine.reconcile(&self.candidate(path)).await
        }
    }

    #[tokio::test]
    async fn test_new_content_creates_record() {
        let h = Harness::new().await;
        let path = h.file("a.jpg", "h1");

        assert_eq!(h.reconcile(&path).await.unwrap(), Outcome::Created);

        let record = h.store.find_by_hash("h1").await.unwrap().unwrap();
        assert!(record.has_filename("a.jpg"));
        assert!(record.is_downloaded);
        assert_eq!(record.owner_id, Some(1));
        assert_eq!(record.mimetype.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_known_id_without_file_adopts_candidate() {
        let h = Harness::new().await;
        h.store.insert(IdentityRecord::new().with_id(5)).await.unwrap();
        let path = h.file("2024-01-01_id_5.jpg", "h5");

        assert_eq!(h.reconcile(&path).await.unwrap(), Outcome::Updated);

        let record = h.store.find_by_id(5).await.unwrap().unwrap();
        assert!(record.has_filename("2024-01-01_id_5.jpg"));
        assert_eq!(record.content_hash.as_deref(), Some("h5"));
        assert!(record.is_downloaded);
        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_trusted_files_leave_one_record_and_one_file() {
        let h = Harness::new().await;
        let a = h.file("a_hash2_abcd.jpg", "ignored");
        let b = h.file("b_hash2_abcd.jpg", "ignored");

        let (ra, rb) = tokio::join!(h.reconcile(&a), h.reconcile(&b));
        let mut outcomes = vec![ra.unwrap(), rb.unwrap()];
        outcomes.sort_by_key(|o| o.as_str());
        assert_eq!(outcomes, vec![Outcome::Created, Outcome::DuplicateRemoved]);

        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
        assert!(h.store.find_by_hash("abcd").await.unwrap().is_some());
        assert_eq!(a.exists() as u8 + b.exists() as u8, 1);
        // Trusted markers are never recomputed
        assert_eq!(h.hasher.calls(), 0);
    }

    #[tokio::test]
    async fn test_known_id_with_missing_file_is_repointed() {
        let h = Harness::new().await;
        h.store
            .insert(IdentityRecord::downloaded("fileA.mp4", "xyz").with_id(7))
            .await
            .unwrap();
        let path = h.file("fileB.mp4", "xyz");

        let candidate = h.candidate(&path).with_id(7);
        let outcome = h.engine.reconcile(&candidate).await.unwrap();
        assert_eq!(outcome, Outcome::OrphanRecovered);

        let record = h.store.find_by_id(7).await.unwrap().unwrap();
        assert!(record.has_filename("fileB.mp4"));
        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_known_id_with_different_content_is_conflict() {
        let h = Harness::new().await;
        h.file("old_id_3.jpg", "h-old");
        let before = h
            .store
            .insert(IdentityRecord::downloaded("old_id_3.jpg", "h-old").with_id(3))
            .await
            .unwrap();
        let path = h.file("new_id_3.jpg", "h-new");

        let err = h.reconcile(&path).await.unwrap_err();
        assert!(err.is_identity_conflict(), "unexpected error: {err}");

        let after = h.store.find_by_id(3).await.unwrap().unwrap();
        assert_eq!(after, before);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_known_id_duplicate_of_existing_file_is_removed() {
        let h = Harness::new().await;
        h.file("old_id_4.jpg", "h4");
        h.store
            .insert(IdentityRecord::downloaded("old_id_4.jpg", "h4").with_id(4))
            .await
            .unwrap();
        let path = h.file("copy_id_4.jpg", "h4");

        assert_eq!(h.reconcile(&path).await.unwrap(), Outcome::DuplicateRemoved);
        assert!(!path.exists());
        assert!(h.root.path().join("old_id_4.jpg").exists());
    }

    #[tokio::test]
    async fn test_known_id_without_hash_checks_previous_file() {
        let h = Harness::new().await;
        h.file("old_id_6.jpg", "h6");
        let mut record = IdentityRecord::new().with_id(6);
        record.local_filename = Some("old_id_6.jpg".into());
        h.store.insert(record).await.unwrap();
        let path = h.file("new_id_6.jpg", "h6");

        assert_eq!(h.reconcile(&path).await.unwrap(), Outcome::DuplicateRemoved);
        let record = h.store.find_by_id(6).await.unwrap().unwrap();
        assert_eq!(record.content_hash.as_deref(), Some("h6"));
        assert!(record.is_downloaded);
    }

    #[tokio::test]
    async fn test_id_record_merges_into_hash_owner() {
        let h = Harness::new().await;
        h.file("first.jpg", "shared");
        h.store
            .insert(IdentityRecord::downloaded("first.jpg", "shared"))
            .await
            .unwrap();
        h.store.insert(IdentityRecord::new().with_id(11)).await.unwrap();
        let path = h.file("x_id_11.jpg", "shared");

        assert_eq!(h.reconcile(&path).await.unwrap(), Outcome::DuplicateRemoved);

        let all = h.store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, Some(11));
        assert!(all[0].has_filename("first.jpg"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_duplicate_kept_under_keep_policy() {
        let h = Harness::with_policy(DuplicatePolicy::Keep).await;
        let a = h.file("a.jpg", "same");
        let b = h.file("b.jpg", "same");

        assert_eq!(h.reconcile(&a).await.unwrap(), Outcome::Created);
        assert_eq!(h.reconcile(&b).await.unwrap(), Outcome::DuplicateKept);
        assert!(a.exists() && b.exists());
    }

    #[tokio::test]
    async fn test_legacy_marker_is_rehashed() {
        let h = Harness::new().await;
        let path = h.file("x_hash_1234.jpg", "real");

        let candidate = h.candidate(&path);
        assert!(matches!(candidate.identity.hash, HashSignal::Legacy { .. }));
        assert_eq!(h.engine.reconcile(&candidate).await.unwrap(), Outcome::Created);

        assert_eq!(h.hasher.calls(), 1);
        assert!(h.store.find_by_hash("1234").await.unwrap().is_none());
        assert!(h.store.find_by_hash("real").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let h = Harness::new().await;
        let path = h.file("a.jpg", "h1");

        h.reconcile(&path).await.unwrap();
        let before = h.store.list_all().await.unwrap();
        assert_eq!(h.reconcile(&path).await.unwrap(), Outcome::Updated);

        assert_eq!(h.store.list_all().await.unwrap(), before);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_identical_files_race_to_one_record() {
        let h = Harness::new().await;
        let paths: Vec<PathBuf> = (0..8).map(|i| h.file(&format!("copy{i}.png"), "same")).collect();

        let results = futures::future::join_all(paths.iter().map(|p| h.reconcile(p))).await;
        let outcomes: Vec<Outcome> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| **o == Outcome::Created).count(), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == Outcome::DuplicateRemoved).count(),
            paths.len() - 1
        );
        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
        assert_eq!(paths.iter().filter(|p| p.exists()).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_identical_files_race_for_orphaned_record() {
        let h = Harness::new().await;
        h.store
            .insert(IdentityRecord::downloaded("gone.jpg", "same"))
            .await
            .unwrap();
        let paths: Vec<PathBuf> = (0..8).map(|i| h.file(&format!("c{i}.jpg"), "same")).collect();

        let results = futures::future::join_all(paths.iter().map(|p| h.reconcile(p))).await;
        let outcomes: Vec<Outcome> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| **o == Outcome::OrphanRecovered).count(), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == Outcome::DuplicateRemoved).count(),
            paths.len() - 1
        );

        let all = h.store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        let survivors: Vec<&PathBuf> = paths.iter().filter(|p| p.exists()).collect();
        assert_eq!(survivors.len(), 1);
        let name = survivors[0].file_name().unwrap().to_str().unwrap();
        assert!(all[0].has_filename(name));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_id_marked_files_race_for_orphaned_record() {
        let h = Harness::new().await;
        h.store
            .insert(IdentityRecord::downloaded("gone_id_9.jpg", "same").with_id(9))
            .await
            .unwrap();
        let paths: Vec<PathBuf> = (0..8)
            .map(|i| h.file(&format!("copy{i}_id_9.jpg"), "same"))
            .collect();

        let results = futures::future::join_all(paths.iter().map(|p| h.reconcile(p))).await;
        let outcomes: Vec<Outcome> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| **o == Outcome::OrphanRecovered).count(), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == Outcome::DuplicateRemoved).count(),
            paths.len() - 1
        );

        let record = h.store.find_by_id(9).await.unwrap().unwrap();
        let survivors: Vec<&PathBuf> = paths.iter().filter(|p| p.exists()).collect();
        assert_eq!(survivors.len(), 1);
        let name = survivors[0].file_name().unwrap().to_str().unwrap();
        assert!(record.has_filename(name));
        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_renamed_file_carries_its_record() {
        let h = Harness::new().await;
        h.store
            .insert(IdentityRecord::downloaded("v_hash_1.jpg", "1").with_id(4))
            .await
            .unwrap();
        let path = h.file("v.jpg", "fresh");

        let candidate = h.candidate(&path).renamed_from("v_hash_1.jpg");
        assert_eq!(h.engine.reconcile(&candidate).await.unwrap(), Outcome::Updated);

        let all = h.store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].has_filename("v.jpg"));
        assert_eq!(all[0].content_hash.as_deref(), Some("fresh"));
        assert_eq!(all[0].id, Some(4));
    }

    #[tokio::test]
    async fn test_undecodable_candidate_is_format_error() {
        let h = Harness::new().await;
        let path = h.file("broken.jpg", "!garbage");

        assert!(h.reconcile(&path).await.unwrap_err().is_format());
        assert!(h.store.list_all().await.unwrap().is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_migrated_identity_overrides_filename() {
        let h = Harness::new().await;
        let path = h.file("plain.jpg", "unused");

        let candidate = h.candidate(&path).with_identity(ExtractedIdentity {
            id: None,
            hash: HashSignal::Trusted("feed".into()),
        });
        assert_eq!(h.engine.reconcile(&candidate).await.unwrap(), Outcome::Created);
        assert!(h.store.find_by_hash("feed").await.unwrap().is_some());
        assert_eq!(h.hasher.calls(), 0);
    }

    #[test]
    fn test_candidate_rejects_unsupported_files() {
        assert!(Candidate::from_path("/r/notes.txt", None).unwrap_err().is_format());
        assert_eq!(Candidate::from_path("/r/a.MP4", None).unwrap().kind, MediaKind::Video);
    }
}
