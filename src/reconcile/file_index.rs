//! Filename → path lookup shared by every reconciliation task.
//!
//! Records store bare filenames, so deciding whether "the previous file
//! still exists" needs a way back to a path. The pipeline builds the index
//! once from discovery and every delete/rename keeps it current.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

/// Shared, cheaply clonable filename index.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    entries: Arc<RwLock<HashMap<String, PathBuf>>>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from discovered paths. On duplicate filenames the
    /// first path wins.
    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Self {
        let index = Self::new();
        index.extend(paths);
        index
    }

    /// Add discovered paths, keeping existing entries on name clashes.
    pub fn extend<'a>(&self, paths: impl IntoIterator<Item = &'a PathBuf>) {
        let mut entries = self.entries.write();
        for path in paths {
            if let Some(name) = file_name(path) {
                entries.entry(name).or_insert_with(|| path.clone());
            }
        }
    }

    pub fn insert(&self, path: &Path) {
        if let Some(name) = file_name(path) {
            self.entries.write().insert(name, path.to_path_buf());
        }
    }

    /// Forget `path`, leaving any other file with the same name alone.
    pub fn remove(&self, path: &Path) {
        let Some(name) = file_name(path) else {
            return;
        };
        let mut entries = self.entries.write();
        if entries.get(&name).is_some_and(|p| p == path) {
            entries.remove(&name);
        }
    }

    pub fn rename(&self, from: &Path, to: &Path) {
        self.remove(from);
        self.insert(to);
    }

    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        self.entries.read().get(filename).cloned()
    }

    /// Path of an existing file called `filename`.
    ///
    /// Looks in the index first, then next to `near` (the candidate being
    /// reconciled), which covers files that were not part of discovery.
    pub fn locate(&self, filename: &str, near: &Path) -> Option<PathBuf> {
        if let Some(path) = self.resolve(filename)
            && path.is_file()
        {
            return Some(path);
        }

        let sibling = near.parent()?.join(filename);
        sibling.is_file().then_some(sibling)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()?.to_str().map(str::to_string)
}
