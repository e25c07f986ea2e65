//! Test utilities and fixtures for media-reconciler tests.
//!
//! This module provides temporary databases, synthetic media files, and a
//! stub hasher so reconciliation scenarios can be written without real
//! photos or videos.
//!
//! # Example
//!
//! ```ignore
//! use media_reconciler::test_utils::{temp_store, ContentsHasher};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (store, _dir) = temp_store().await;
//!     // ... test logic
//! }
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::hasher::ContentHasher;
use crate::store::SqliteStore;

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically. Keep the TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");

    let pool = crate::db::init_db(&crate::db::db_url(Some(&db_path)))
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Creates a [`SqliteStore`] over a temporary database.
pub async fn temp_store() -> (SqliteStore, TempDir) {
    let (pool, dir) = temp_db().await;
    (SqliteStore::new(pool), dir)
}

/// Hasher whose fingerprint is the file's own text.
///
/// Write `"h1"` into a file and it hashes to `"h1"`, which keeps scenario
/// tests readable. Contents starting with `!` fail as undecodable.
#[derive(Debug, Default)]
pub struct ContentsHasher {
    calls: AtomicUsize,
}

impl ContentsHasher {
    /// Number of fingerprints computed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn read(&self, path: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = std::fs::read_to_string(path)?;
        let text = text.trim();
        if text.starts_with('!') {
            return Err(Error::format(path, "stub decode failure"));
        }
        Ok(text.to_string())
    }
}

impl ContentHasher for ContentsHasher {
    fn hash_image(&self, path: &Path) -> Result<String> {
        self.read(path)
    }

    fn hash_media_container(&self, path: &Path) -> Result<String> {
        self.read(path)
    }
}

/// A 64x64 synthetic image. Different seeds give visibly different
/// low-frequency structure.
pub fn test_image(seed: u32) -> DynamicImage {
    let block = 4 + (seed % 7) * 4;
    let image = RgbImage::from_fn(64, 64, |x, y| {
        let checker = ((x / block) + (y / block) + seed) % 2 == 0;
        let base = if checker { 200u32 } else { 40 };
        let shade = (base + (x * (seed % 5 + 1) + y * (seed % 3)) / 4).min(255) as u8;
        Rgb([shade, shade / 2, 255 - shade])
    });
    DynamicImage::ImageRgb8(image)
}

/// Write [`test_image`] as a PNG.
pub fn write_test_png(path: &Path, seed: u32) {
    test_image(seed)
        .save_with_format(path, ImageFormat::Png)
        .expect("Failed to write test PNG");
}

fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn header_payload(created: u32, extra: usize) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&created.to_be_bytes());
    payload.extend_from_slice(&created.to_be_bytes());
    payload.extend_from_slice(&1000u32.to_be_bytes());
    payload.resize(payload.len() + extra, 0);
    payload
}

fn mp4_moov(title: &str, created: u32, chunk_offset: u32) -> Vec<u8> {
    let mut stco = vec![0u8; 4];
    stco.extend_from_slice(&1u32.to_be_bytes());
    stco.extend_from_slice(&chunk_offset.to_be_bytes());

    let stbl = mp4_box(b"stbl", &mp4_box(b"stco", &stco));
    let minf = mp4_box(b"minf", &stbl);
    let mut mdia = mp4_box(b"mdhd", &header_payload(created, 8));
    mdia.extend(minf);

    let mut trak = mp4_box(b"tkhd", &header_payload(created, 68));
    trak.extend(mp4_box(b"mdia", &mdia));

    let mut moov = mp4_box(b"mvhd", &header_payload(created, 84));
    moov.extend(mp4_box(b"trak", &trak));
    moov.extend(mp4_box(b"udta", &mp4_box(&[0xA9, b'n', b'a', b'm'], title.as_bytes())));
    mp4_box(b"moov", &moov)
}

/// Bytes of a minimal MP4: `ftyp`, `moov` (with title and creation time
/// metadata), then `mdat` holding `payload`.
pub fn mp4_bytes(payload: &[u8], title: &str, created: u32) -> Vec<u8> {
    let mut ftyp = b"isom".to_vec();
    ftyp.extend_from_slice(&0u32.to_be_bytes());
    ftyp.extend_from_slice(b"isommp41");
    let ftyp = mp4_box(b"ftyp", &ftyp);

    let prefix = ftyp.len() + mp4_moov(title, created, 0).len();
    let moov = mp4_moov(title, created, (prefix + 8) as u32);

    let mut out = ftyp;
    out.extend(moov);
    out.extend(mp4_box(b"mdat", payload));
    out
}

/// Write [`mp4_bytes`] to `path`.
pub fn write_mp4(path: &Path, payload: &[u8], title: &str, created: u32) {
    std::fs::write(path, mp4_bytes(payload, title, created)).expect("Failed to write test MP4");
}

/// Write a minimal MP3: optional ID3v2 tag, one frame header plus `frames`,
/// and an optional ID3v1 trailer.
pub fn write_mp3(path: &Path, frames: &[u8], id3v2: Option<&str>, id3v1: bool) {
    let mut out = Vec::new();
    if let Some(text) = id3v2 {
        let size = text.len() as u32;
        out.extend_from_slice(b"ID3\x04\x00\x00");
        // syncsafe size
        for shift in [21, 14, 7, 0] {
            out.push(((size >> shift) & 0x7f) as u8);
        }
        out.extend_from_slice(text.as_bytes());
    }
    out.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x64]);
    out.extend_from_slice(frames);
    if id3v1 {
        let mut tag = b"TAG".to_vec();
        tag.resize(128, b' ');
        out.extend(tag);
    }
    std::fs::write(path, out).expect("Failed to write test MP3");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[test]
    fn test_contents_hasher() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.jpg");
        let bad = dir.path().join("b.jpg");
        std::fs::write(&good, "h1\n").unwrap();
        std::fs::write(&bad, "!nope").unwrap();

        let hasher = ContentsHasher::default();
        assert_eq!(hasher.hash_image(&good).unwrap(), "h1");
        assert!(hasher.hash_image(&bad).unwrap_err().is_format());
        assert_eq!(hasher.calls(), 2);
    }

    #[test]
    fn test_mp4_chunk_offset_points_at_mdat_payload() {
        let bytes = mp4_bytes(b"PAYLOAD", "t", 1);
        let offset = bytes.len() - b"PAYLOAD".len();
        assert_eq!(&bytes[offset..], b"PAYLOAD");
        assert_eq!(&bytes[offset - 4..offset], b"mdat");
    }
}
