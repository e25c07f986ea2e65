//! Core data models for the identity store.
//!
//! Defines [`IdentityRecord`], the single entity persisted by the store, and
//! [`MediaKind`], which selects the fingerprint algorithm for a file.
//!
//! # Database Schema
//!
//! Records map to the `media` table:
//! - `row_id` - surrogate key assigned by the store
//! - `id` - platform content id (unique when present)
//! - `content_hash` - fingerprint (unique when present)
//! - `local_filename` - bare filename of the file holding the content
//! - `version` - bumped on every write, checked by every update

use std::path::Path;

use sqlx::FromRow;

/// One record per distinct piece of content.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct IdentityRecord {
    /// Store key (0 until persisted)
    pub row_id: i64,
    /// Platform content id
    pub id: Option<i64>,
    /// Owning creator
    pub owner_id: Option<i64>,
    /// Content fingerprint
    pub content_hash: Option<String>,
    /// Bare filename, never a full path
    pub local_filename: Option<String>,
    /// True while `local_filename` names an existing, verified file
    pub is_downloaded: bool,
    pub mimetype: Option<String>,
    /// Write counter; updates only apply to the version they read
    pub version: i64,
    /// RFC 3339 timestamp of the last write
    pub updated_at: String,
}

impl IdentityRecord {
    /// A record that has not been persisted yet.
    pub fn new() -> Self {
        Self {
            row_id: 0,
            id: None,
            owner_id: None,
            content_hash: None,
            local_filename: None,
            is_downloaded: false,
            mimetype: None,
            version: 0,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// A downloaded record for a file observed on disk.
    pub fn downloaded(filename: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            local_filename: Some(filename.into()),
            content_hash: Some(content_hash.into()),
            is_downloaded: true,
            ..Self::new()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Whether this record's filename is `name`.
    pub fn has_filename(&self, name: &str) -> bool {
        self.local_filename.as_deref() == Some(name)
    }
}

impl Default for IdentityRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Declared media kind of a file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

impl MediaKind {
    /// Detect the media kind from a path's extension (case-insensitive).
    ///
    /// Returns `None` for files the hasher cannot fingerprint.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tif" | "tiff" => Some(Self::Image),
            "mp4" | "m4v" | "mov" => Some(Self::Video),
            "m4a" | "mp3" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Mimetype for a path of this kind.
    pub fn mimetype(path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        Some(match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "bmp" => "image/bmp",
            "tif" | "tiff" => "image/tiff",
            "mp4" | "m4v" => "video/mp4",
            "mov" => "video/quicktime",
            "m4a" => "audio/mp4",
            "mp3" => "audio/mpeg",
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a.JPG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("b.mp4")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("c.m4a")), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_mimetype() {
        assert_eq!(MediaKind::mimetype(Path::new("x.jpeg")), Some("image/jpeg"));
        assert_eq!(MediaKind::mimetype(Path::new("x.MOV")), Some("video/quicktime"));
        assert_eq!(MediaKind::mimetype(Path::new("x.doc")), None);
    }

    #[test]
    fn test_downloaded_record() {
        let record = IdentityRecord::downloaded("a.jpg", "abcd").with_id(5).with_owner(1);
        assert!(record.is_downloaded);
        assert!(record.has_filename("a.jpg"));
        assert_eq!(record.id, Some(5));
        assert_eq!(record.owner_id, Some(1));
        assert_eq!(record.row_id, 0);
    }
}
