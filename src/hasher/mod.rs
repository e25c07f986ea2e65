//! Content fingerprints for media files.
//!
//! Two algorithms, selected by [`MediaKind`]:
//!
//! - Images get a 64-bit DCT perceptual hash ([`perceptual`]). Lossless
//!   re-encodes and recompressions that keep the pixels produce the same
//!   fingerprint even though the bytes differ.
//! - Audio and video get a structural SHA-256 over the container
//!   ([`container`]) that leaves out metadata a platform may rewrite without
//!   touching the audio/video payload.
//!
//! Both are CPU-bound and synchronous. Async callers go through
//! [`HashWorkers`], which runs them on dedicated threads.

pub mod container;
pub mod perceptual;
mod workers;

use std::path::Path;

use crate::error::Result;
use crate::model::MediaKind;

pub use workers::HashWorkers;

/// Fingerprint algorithms consumed by the reconciliation engine.
///
/// Implement this trait to substitute fingerprints in tests.
pub trait ContentHasher: Send + Sync {
    /// Perceptual fingerprint of an image. Fails with
    /// [`Error::Format`](crate::error::Error::Format) if the file does not
    /// decode.
    fn hash_image(&self, path: &Path) -> Result<String>;

    /// Structural fingerprint of an audio/video container. Fails with
    /// [`Error::Format`](crate::error::Error::Format) on invalid structure.
    fn hash_media_container(&self, path: &Path) -> Result<String>;

    /// Dispatch on the declared media kind.
    fn fingerprint(&self, path: &Path, kind: MediaKind) -> Result<String> {
        match kind {
            MediaKind::Image => self.hash_image(path),
            MediaKind::Audio | MediaKind::Video => self.hash_media_container(path),
        }
    }
}

/// Production hasher reading files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileHasher;

impl ContentHasher for FileHasher {
    fn hash_image(&self, path: &Path) -> Result<String> {
        perceptual::perceptual_hash(path)
    }

    fn hash_media_container(&self, path: &Path) -> Result<String> {
        container::structural_hash(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{write_mp4, write_test_png};
    use tempfile::tempdir;

    #[test]
    fn test_dispatch_by_kind() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("a.png");
        let mp4 = dir.path().join("a.mp4");
        write_test_png(&png, 3);
        write_mp4(&mp4, b"frames", "title", 1);

        let hasher = FileHasher;
        let image_hash = hasher.fingerprint(&png, MediaKind::Image).unwrap();
        let video_hash = hasher.fingerprint(&mp4, MediaKind::Video).unwrap();
        assert_eq!(image_hash.len(), 16);
        assert_eq!(video_hash.len(), 64);
    }

    #[test]
    fn test_declared_kind_mismatch_is_format_error() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("a.png");
        write_test_png(&png, 3);

        let err = FileHasher.fingerprint(&png, MediaKind::Video).unwrap_err();
        assert!(err.is_format());
    }
}
