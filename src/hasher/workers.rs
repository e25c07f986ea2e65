//! Dedicated hashing threads.
//!
//! Image decoding and container hashing are CPU-bound. Running them on the
//! async runtime would starve the store and filesystem futures, so jobs are
//! queued to a fixed set of OS threads and the result comes back over a
//! oneshot channel.
//!
//! ```text
//! async caller ──(semaphore)──▶ crossbeam queue ──▶ hash-worker-N
//!      ▲                                               │
//!      └──────────────── oneshot reply ◀───────────────┘
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, oneshot};

use super::ContentHasher;
use crate::error::{Error, Result};
use crate::model::MediaKind;

/// Jobs allowed in flight per worker thread.
const PERMITS_PER_THREAD: usize = 2;

struct Job {
    path: PathBuf,
    kind: MediaKind,
    reply: oneshot::Sender<Result<String>>,
}

struct Inner {
    jobs: Mutex<Option<Sender<Job>>>,
    permits: Semaphore,
}

/// Handle to the hashing thread pool. Cheap to clone.
#[derive(Clone)]
pub struct HashWorkers {
    inner: Arc<Inner>,
}

impl HashWorkers {
    /// Start `threads` workers (at least one) around `hasher`.
    pub fn spawn(hasher: Arc<dyn ContentHasher>, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (tx, rx) = unbounded::<Job>();

        for n in 0..threads {
            let rx = rx.clone();
            let hasher = Arc::clone(&hasher);
            thread::Builder::new()
                .name(format!("hash-worker-{n}"))
                .spawn(move || worker_main(hasher, rx))?;
        }

        tracing::debug!(target: "hasher", threads, "Hash workers started");

        Ok(Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(Some(tx)),
                permits: Semaphore::new(threads * PERMITS_PER_THREAD),
            }),
        })
    }

    /// Fingerprint `path` on a worker thread.
    ///
    /// Waits for a free slot when every worker is busy. Fails with
    /// [`Error::WorkerUnavailable`] once the pool is shut down.
    pub async fn fingerprint(&self, path: &Path, kind: MediaKind) -> Result<String> {
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| Error::WorkerUnavailable)?;

        let sender = self.inner.jobs.lock().clone().ok_or(Error::WorkerUnavailable)?;
        let (reply, response) = oneshot::channel();
        sender
            .send(Job {
                path: path.to_path_buf(),
                kind,
                reply,
            })
            .map_err(|_| Error::WorkerUnavailable)?;

        response.await.map_err(|_| Error::WorkerUnavailable)?
    }

    /// Stop accepting jobs. Queued jobs still complete; workers exit once
    /// the queue drains.
    pub fn shutdown(&self) {
        self.inner.jobs.lock().take();
        self.inner.permits.close();
    }
}

fn worker_main(hasher: Arc<dyn ContentHasher>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        let result = catch_unwind(AssertUnwindSafe(|| hasher.fingerprint(&job.path, job.kind)))
            .unwrap_or_else(|_| {
                tracing::error!(target: "hasher", path = %job.path.display(), "Hasher panicked");
                Err(Error::format(&job.path, "hasher panicked"))
            });
        // Receiver gone means the caller was cancelled
        let _ = job.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ContentsHasher;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fingerprint_runs_on_workers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, "aaaa").unwrap();

        let hasher = Arc::new(ContentsHasher::default());
        let workers = HashWorkers::spawn(hasher.clone(), 2).unwrap();

        let hash = workers.fingerprint(&path, MediaKind::Image).await.unwrap();
        assert_eq!(hash, "aaaa");
        assert_eq!(hasher.calls(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_returned_to_caller() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, "!corrupt").unwrap();

        let workers = HashWorkers::spawn(Arc::new(ContentsHasher::default()), 1).unwrap();
        let err = workers.fingerprint(&path, MediaKind::Image).await.unwrap_err();
        assert!(err.is_format());
    }

    #[tokio::test]
    async fn test_many_concurrent_jobs() {
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..20 {
            let path = dir.path().join(format!("{i}.jpg"));
            std::fs::write(&path, format!("hash{i}")).unwrap();
            paths.push(path);
        }

        let workers = HashWorkers::spawn(Arc::new(ContentsHasher::default()), 3).unwrap();
        let results = futures::future::join_all(
            paths
                .iter()
                .map(|p| workers.fingerprint(p, MediaKind::Image)),
        )
        .await;

        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), format!("hash{i}"));
        }
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, "aaaa").unwrap();

        let workers = HashWorkers::spawn(Arc::new(ContentsHasher::default()), 1).unwrap();
        workers.shutdown();

        let err = workers.fingerprint(&path, MediaKind::Image).await.unwrap_err();
        assert!(matches!(err, Error::WorkerUnavailable));
    }
}
