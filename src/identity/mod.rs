//! Identity markers embedded in filenames.
//!
//! Older releases of the downloader wrote content hashes into filenames so a
//! later scan could skip rehashing. Three generations of that marker exist,
//! alongside the platform content id:
//!
//! | Marker | Meaning |
//! |---|---|
//! | `_id_<digits>` | platform content id |
//! | `_hash_<hex>` | legacy fingerprint, generation 0 |
//! | `_hash1_<hex>` | legacy fingerprint, generation 1 |
//! | `_hash2_<hex>` | trusted fingerprint, current generation |
//!
//! Legacy fingerprints were produced by deprecated algorithms and are not
//! comparable with current ones, so they always force a rehash. Trusted
//! fingerprints are authoritative and are never recomputed.
//!
//! Everything here is pure; unmatched or malformed input yields "no marker".

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static ID_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_id_(\d+)").expect("id marker pattern"));

static HASH_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_hash([12]?)_([0-9a-fA-F]+)").expect("hash marker pattern"));

/// Hash evidence carried by a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashSignal {
    /// No hash marker.
    None,
    /// Deprecated marker; the hash must be recomputed.
    Legacy { generation: u8, hash: String },
    /// Current-generation marker; the hash is authoritative.
    Trusted(String),
}

impl HashSignal {
    /// Whether the file has to be fingerprinted before it can be matched.
    pub fn needs_rehash(&self) -> bool {
        !matches!(self, HashSignal::Trusted(_))
    }

    pub fn trusted_hash(&self) -> Option<&str> {
        match self {
            HashSignal::Trusted(hash) => Some(hash),
            _ => None,
        }
    }
}

/// Identity signals extracted from one filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedIdentity {
    pub id: Option<i64>,
    pub hash: HashSignal,
}

/// Extract the id and hash markers from a filename.
///
/// Markers are looked for in the stem only. When more than one hash marker
/// is present the trusted one wins, then the newest legacy generation.
pub fn extract(filename: &str) -> ExtractedIdentity {
    let stem = file_stem(filename);

    let id = ID_MARKER
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok());

    let mut best: Option<(u8, String)> = None;
    for caps in HASH_MARKER.captures_iter(stem) {
        let generation = match caps.get(1).map(|m| m.as_str()) {
            Some("1") => 1,
            Some("2") => 2,
            _ => 0,
        };
        let Some(hash) = caps.get(2) else {
            continue;
        };
        if best.as_ref().is_none_or(|(g, _)| generation > *g) {
            best = Some((generation, hash.as_str().to_ascii_lowercase()));
        }
    }

    let hash = match best {
        Some((2, hash)) => HashSignal::Trusted(hash),
        Some((generation, hash)) => HashSignal::Legacy { generation, hash },
        None => HashSignal::None,
    };

    ExtractedIdentity { id, hash }
}

/// Remove every hash marker from a filename, keeping the id marker and the
/// extension.
///
/// Returns `None` when the filename carries no hash marker.
pub fn strip_hash_markers(filename: &str) -> Option<String> {
    let stem = file_stem(filename);
    if !HASH_MARKER.is_match(stem) {
        return None;
    }

    let stripped = HASH_MARKER.replace_all(stem, "");
    let stripped = stripped.trim_matches(|c| c == '_' || c == ' ');
    let stem = if stripped.is_empty() { "media" } else { stripped };

    Some(match file_extension(filename) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    })
}

fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

fn file_extension(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|s| s.to_str())
}
