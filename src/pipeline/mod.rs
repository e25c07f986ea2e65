//! Batch pipeline: discover, migrate, reconcile, verify.
//!
//! ```text
//! validate root/owner
//!        │
//!   scanner::scan ──▶ FileIndex
//!        │
//!   migration pre-pass ──(unsettled files)──▶ main pass ──▶ verification
//!        │                                       │
//!        └──────────── PipelineStats ◀───────────┘
//! ```
//!
//! Candidates in each pass are driven through `buffer_unordered` with a
//! degree of concurrency that grows with the batch, one task per file.
//! Hashing happens on the [`HashWorkers`] threads, never on the runtime.

mod progress;
mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hasher::{ContentHasher, FileHasher, HashWorkers};
use crate::migration::Migrator;
use crate::reconcile::{Candidate, DuplicatePolicy, FileIndex, Outcome, Reconciler};
use crate::scanner;
use crate::store::IdentityStore;
use crate::verify::{self, VerificationReport};

pub use progress::{CancelHandle, ProgressSink, TracingSink};
pub use stats::PipelineStats;

/// Progress is reported every this many candidates.
pub const PROGRESS_EVERY: usize = 100;

/// Candidates per unit of concurrency.
const ITEMS_PER_TASK: usize = 10;

/// `ceil(batch_len / 10)`, clamped to `[1, max_concurrency]`.
pub fn degree_of_concurrency(batch_len: usize, max_concurrency: usize) -> usize {
    batch_len
        .div_ceil(ITEMS_PER_TASK)
        .clamp(1, max_concurrency.max(1))
}

/// Pipeline tuning, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_concurrency: usize,
    pub hash_threads: usize,
    pub migrate_legacy: bool,
    pub verify_after: bool,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        let p = &config.pipeline;
        Self {
            max_concurrency: p.max_concurrency,
            hash_threads: p.hash_threads,
            migrate_legacy: p.migrate_legacy,
            verify_after: p.verify_after,
            duplicate_policy: if p.delete_duplicates {
                DuplicatePolicy::Delete
            } else {
                DuplicatePolicy::Keep
            },
        }
    }
}

/// Reconciles a creator's library directory against the identity store.
pub struct Pipeline {
    engine: Reconciler,
    root: PathBuf,
    owner_id: i64,
    options: PipelineOptions,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelHandle,
}

impl Pipeline {
    /// Build a pipeline with an explicit hasher.
    ///
    /// Fails with [`Error::MissingPrerequisite`] if `root` is not a
    /// directory.
    pub fn new(
        store: Arc<dyn IdentityStore>,
        hasher: Arc<dyn ContentHasher>,
        root: impl Into<PathBuf>,
        owner_id: i64,
        options: PipelineOptions,
    ) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::missing(format!(
                "library root {} is not a directory",
                root.display()
            )));
        }

        let workers = HashWorkers::spawn(hasher, options.hash_threads)?;
        let engine = Reconciler::new(store, workers, FileIndex::new())
            .with_policy(options.duplicate_policy);

        Ok(Self {
            engine,
            root,
            owner_id,
            options,
            sink: Arc::new(TracingSink),
            cancel: CancelHandle::new(),
        })
    }

    /// Build a pipeline from configuration with the production hasher.
    pub fn from_config(config: &Config, store: Arc<dyn IdentityStore>) -> Result<Self> {
        let root = config.require_root()?.to_path_buf();
        let owner_id = config.require_owner()?;
        Self::new(
            store,
            Arc::new(FileHasher),
            root,
            owner_id,
            PipelineOptions::from(config),
        )
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full run: discovery, migration (if enabled), main pass, verification
    /// (if enabled).
    pub async fn run(&self) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();
        let paths = self.index_library().await?;
        stats.discovered = paths.len();

        let remaining = if self.options.migrate_legacy {
            self.migrate_batch(paths, &mut stats).await
        } else {
            paths
        };

        self.reconcile_batch(remaining, &mut stats).await;

        if self.options.verify_after && !self.cancel.is_cancelled() {
            stats.verification = Some(self.verify_indexed().await?);
        }

        stats.cancelled = self.cancel.is_cancelled();
        self.sink.summary(&stats);
        Ok(stats)
    }

    /// Discovery and the migration pre-pass only.
    pub async fn migrate(&self) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();
        let paths = self.index_library().await?;
        stats.discovered = paths.len();

        self.migrate_batch(paths, &mut stats).await;

        stats.cancelled = self.cancel.is_cancelled();
        self.sink.summary(&stats);
        Ok(stats)
    }

    /// Reconcile a single file, e.g. one the download layer just wrote.
    pub async fn reconcile_file(&self, path: &Path) -> Result<Outcome> {
        self.reconcile_path(path).await
    }

    /// Reconcile a single file under a platform id supplied by the caller.
    pub async fn reconcile_download(&self, path: &Path, id: i64) -> Result<Outcome> {
        let candidate = Candidate::from_path(path, Some(self.owner_id))?.with_id(id);
        self.engine.reconcile(&candidate).await
    }

    /// Standalone verification pass.
    pub async fn verify(&self) -> Result<VerificationReport> {
        self.index_library().await?;
        self.verify_indexed().await
    }

    async fn verify_indexed(&self) -> Result<VerificationReport> {
        verify::verify(
            self.engine.store().as_ref(),
            self.engine.files(),
            &self.root,
            Some(self.owner_id),
        )
        .await
    }

    /// Discover media under the root and add it to the file index.
    async fn index_library(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = scanner::scan(self.root.clone()).collect().await;
        paths.sort();
        self.engine.files().extend(&paths);

        tracing::info!(
            target: "pipeline",
            root = %self.root.display(),
            files = paths.len(),
            "Discovered media files"
        );
        Ok(paths)
    }

    /// Run the migration pre-pass and return the files left for the main
    /// pass.
    async fn migrate_batch(&self, paths: Vec<PathBuf>, stats: &mut PipelineStats) -> Vec<PathBuf> {
        let total = paths.len();
        let degree = degree_of_concurrency(total, self.options.max_concurrency);
        let migrator = Migrator::new(self.engine.clone(), Some(self.owner_id));
        let mut remaining = Vec::new();

        let cancel = &self.cancel;
        let mut results = futures::stream::iter(paths)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|path| {
                let migrator = &migrator;
                async move {
                    let result = migrator.migrate_file(&path).await;
                    (path, result)
                }
            })
            .buffer_unordered(degree);

        let mut done = 0;
        while let Some((path, result)) = results.next().await {
            match result {
                Ok(migration) => {
                    stats.migration.record(migration.state);
                    if let Some(outcome) = migration.outcome {
                        stats.record_outcome(outcome);
                    }
                    if !migration.state.is_settled() {
                        remaining.push(migration.path);
                    }
                }
                Err(e) => {
                    log_failure(&path, &e);
                    stats.record_error(&e);
                }
            }
            done += 1;
            if done % PROGRESS_EVERY == 0 {
                self.sink.progress(&format!("Migration: {done}/{total} files"));
            }
        }

        if total > 0 {
            self.sink.progress(&format!(
                "Migration finished: {} migrated, {} preserved, {} id-matched",
                stats.migration.migrated, stats.migration.preserved, stats.migration.id_matched
            ));
        }
        remaining.sort();
        remaining
    }

    async fn reconcile_batch(&self, paths: Vec<PathBuf>, stats: &mut PipelineStats) {
        let total = paths.len();
        let degree = degree_of_concurrency(total, self.options.max_concurrency);
        tracing::debug!(target: "pipeline", total, degree, "Reconciling");

        let cancel = &self.cancel;
        let mut results = futures::stream::iter(paths)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|path| async move {
                let result = self.reconcile_path(&path).await;
                (path, result)
            })
            .buffer_unordered(degree);

        let mut done = 0;
        while let Some((path, result)) = results.next().await {
            if let Err(e) = &result {
                log_failure(&path, e);
            }
            stats.record(&result);
            done += 1;
            if done % PROGRESS_EVERY == 0 {
                self.sink.progress(&format!("Processed {done}/{total} files"));
            }
        }

        self.sink.progress(&format!("Processed {done}/{total} files"));
    }

    async fn reconcile_path(&self, path: &Path) -> Result<Outcome> {
        let candidate = Candidate::from_path(path, Some(self.owner_id))?;
        self.engine.reconcile(&candidate).await
    }
}

fn log_failure(path: &Path, error: &Error) {
    if error.is_identity_conflict() || error.is_format() {
        tracing::warn!(target: "pipeline", path = %path.display(), error = %error, "Skipped file");
    } else {
        tracing::error!(target: "pipeline", path = %path.display(), error = %error, "Failed to reconcile");
    }
}
