//! Invalidation sources that a cached value can depend on.

use kpm_util::hash::{digest_entries, digest_file};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use walkdir::WalkDir;

/// Something a cached value was derived from.
///
/// Once `has_changed` returns true the dependent entry is stale and is
/// recomputed on its next access.
pub trait CacheDependency: Send + Sync + fmt::Debug {
    fn has_changed(&self) -> bool;
}

/// Named invalidation triggers.
///
/// Cloning shares the underlying generation counters, so a trigger fired
/// through any clone invalidates dependencies handed out by every clone.
#[derive(Debug, Clone, Default)]
pub struct NamedTriggers {
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl NamedTriggers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `name`, invalidating every dependency created for it so far.
    pub fn trigger(&self, name: &str) {
        let mut generations = self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generations.entry(name.to_string()).or_insert(0) += 1;
    }

    fn generation(&self, name: &str) -> u64 {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// A dependency that changes the next time `name` is triggered.
    #[must_use]
    pub fn dependency(&self, name: &str) -> Arc<dyn CacheDependency> {
        Arc::new(TriggerDependency {
            triggers: self.clone(),
            name: name.to_string(),
            generation: self.generation(name),
        })
    }
}

#[derive(Debug)]
struct TriggerDependency {
    triggers: NamedTriggers,
    name: String,
    generation: u64,
}

impl CacheDependency for TriggerDependency {
    fn has_changed(&self) -> bool {
        self.triggers.generation(&self.name) != self.generation
    }
}

/// Depends on the content of one file.
///
/// Content is compared by BLAKE3 digest rather than mtime, so rewrites
/// within the filesystem's timestamp granularity are still noticed.
/// Creation and deletion count as changes.
#[derive(Debug, Clone)]
pub struct FileDependency {
    path: PathBuf,
    digest: Option<String>,
}

impl FileDependency {
    /// Snapshot the current content of `path`.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            digest: digest_file(path).ok(),
        }
    }

    /// Snapshot `path` and wrap it for [`super::CacheContext::monitor`].
    #[must_use]
    pub fn shared(path: &Path) -> Arc<dyn CacheDependency> {
        Arc::new(Self::new(path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheDependency for FileDependency {
    fn has_changed(&self) -> bool {
        digest_file(&self.path).ok() != self.digest
    }
}

/// Depends on which entries exist below a directory.
///
/// Pairs with [`FileDependency`]: that one notices edits to known files,
/// this one notices files and folders appearing or disappearing anywhere
/// in the tree. A missing directory has no listing.
#[derive(Debug, Clone)]
pub struct DirectoryDependency {
    root: PathBuf,
    digest: Option<String>,
}

impl DirectoryDependency {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            digest: listing_digest(root),
        }
    }

    #[must_use]
    pub fn shared(root: &Path) -> Arc<dyn CacheDependency> {
        Arc::new(Self::new(root))
    }
}

impl CacheDependency for DirectoryDependency {
    fn has_changed(&self) -> bool {
        listing_digest(&self.root) != self.digest
    }
}

fn listing_digest(root: &Path) -> Option<String> {
    if !root.is_dir() {
        return None;
    }
    let entries: Vec<String> = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(root).ok()?;
            let kind = if entry.file_type().is_dir() { 'd' } else { 'f' };
            Some(format!("{kind} {}", rel.to_string_lossy()))
        })
        .collect();
    Some(digest_entries(entries.iter().map(String::as_str)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_trigger_dependency() {
        let triggers = NamedTriggers::new();
        let dep = triggers.dependency("feed");
        let other = triggers.dependency("projects");
        assert!(!dep.has_changed());

        triggers.clone().trigger("feed");
        assert!(dep.has_changed());
        assert!(!other.has_changed());

        // created after the trigger, so it starts clean
        assert!(!triggers.dependency("feed").has_changed());
    }

    #[test]
    fn test_file_dependency_tracks_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lib.dll");
        fs::write(&path, b"v1").unwrap();

        let dep = FileDependency::new(&path);
        assert!(!dep.has_changed());

        fs::write(&path, b"v2").unwrap();
        assert!(dep.has_changed());

        let dep = FileDependency::new(&path);
        fs::remove_file(&path).unwrap();
        assert!(dep.has_changed());
    }

    #[test]
    fn test_file_dependency_on_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("later.dll");

        let dep = FileDependency::new(&path);
        assert!(!dep.has_changed());

        fs::write(&path, b"now").unwrap();
        assert!(dep.has_changed());
    }

    #[test]
    fn test_directory_dependency_tracks_listing() {
        let dir = tempdir().unwrap();
        let lib = dir.path().join("lib/net45");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("Json.dll"), b"v1").unwrap();

        let dep = DirectoryDependency::new(dir.path());
        assert!(!dep.has_changed());

        // content edits are a file dependency's job
        fs::write(lib.join("Json.dll"), b"v2").unwrap();
        assert!(!dep.has_changed());

        fs::write(lib.join("Json.Bson.dll"), b"new").unwrap();
        assert!(dep.has_changed());

        let dep = DirectoryDependency::new(dir.path());
        fs::remove_file(lib.join("Json.Bson.dll")).unwrap();
        assert!(dep.has_changed());
    }

    #[test]
    fn test_directory_dependency_on_missing_directory() {
        let dir = tempdir().unwrap();
        let shared = dir.path().join("shared");

        let dep = DirectoryDependency::new(&shared);
        assert!(!dep.has_changed());

        fs::create_dir(&shared).unwrap();
        assert!(dep.has_changed());
    }
}
