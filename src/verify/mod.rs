//! Verification pass: forget files that are no longer on disk.
//!
//! Every downloaded record is checked against the file index (falling back
//! to the library root). Records whose file is gone are marked not
//! downloaded and lose their hash, so the next time the content turns up it
//! is reconciled from scratch. Running the pass twice changes nothing the
//! second time.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::error::Result;
use crate::reconcile::FileIndex;
use crate::store::IdentityStore;

/// Outcome of one verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Downloaded records examined
    pub checked: usize,
    /// Records whose file was missing and have been cleared
    pub missing: usize,
}

/// Check every downloaded record of `owner_id` and clear the ones whose
/// file is missing.
pub async fn verify(
    store: &dyn IdentityStore,
    files: &FileIndex,
    root: &Path,
    owner_id: Option<i64>,
) -> Result<VerificationReport> {
    let records = store.list_downloaded(owner_id).await?;
    let checked = records.len();

    let entries: Vec<(i64, Option<String>)> = records
        .into_iter()
        .map(|r| (r.row_id, r.local_filename))
        .collect();
    let files = files.clone();
    let root = root.to_path_buf();

    // File existence checks run in parallel off the async runtime
    let missing: Vec<i64> = tokio::task::spawn_blocking(move || {
        entries
            .par_iter()
            .filter(|(_, name)| !name.as_deref().is_some_and(|n| file_exists(&files, &root, n)))
            .map(|(row_id, _)| *row_id)
            .collect()
    })
    .await
    .map_err(std::io::Error::other)?;

    if !missing.is_empty() {
        store.mark_not_downloaded(&missing).await?;
        tracing::info!(
            target: "verify",
            checked,
            missing = missing.len(),
            "Cleared records with missing files"
        );
    } else {
        tracing::debug!(target: "verify", checked, "All downloaded records present");
    }

    Ok(VerificationReport {
        checked,
        missing: missing.len(),
    })
}

fn file_exists(files: &FileIndex, root: &Path, name: &str) -> bool {
    let indexed: Option<PathBuf> = files.resolve(name);
    indexed.is_some_and(|p| p.is_file()) || root.join(name).is_file()
}
