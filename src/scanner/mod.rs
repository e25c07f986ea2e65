use futures::stream::Stream;
use std::path::PathBuf;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::model::MediaKind;

/// Scans the given root directory recursively for media files.
///
/// Keeps files whose extension maps to a [`MediaKind`] (case-insensitive).
/// Returns a Stream of PathBufs.
pub fn scan(root: PathBuf) -> impl Stream<Item = PathBuf> {
    let (tx, rx) = mpsc::channel(100);

    // Spawn a blocking task to perform the synchronous file system traversal
    tokio::task::spawn_blocking(move || {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || MediaKind::from_path(entry.path()).is_none() {
                continue;
            }
            // If the receiver is dropped, blocking_send returns an error and we stop scanning.
            if tx.blocking_send(entry.into_path()).is_err() {
                break;
            }
        }
    });

    // Convert the mpsc Receiver into a Stream
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|path| (path, rx))
    })
}
