use super::{
    validate_artifact_path, ChangeRecord, PathFilter, RepositoryPublisher, TransmitRecord,
    CHANGES_DIR, CURSOR_INDEX, TRANSMIT_FILE,
};
use crate::error::{Error, Result};
use kpm_util::fs::{
    atomic_create, atomic_write, is_temp_file, read_optional, remove_file_and_empty_parents,
    stable_path,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A repository in a local directory.
#[derive(Debug, Clone)]
pub struct FileSystemPublisher {
    root: PathBuf,
}

impl FileSystemPublisher {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of change record `index`.
    #[must_use]
    pub fn change_record_path(&self, index: u32) -> PathBuf {
        self.root.join(CHANGES_DIR).join(format!("{index}.json"))
    }

    #[must_use]
    pub fn transmit_record_path(&self) -> PathBuf {
        self.root.join(TRANSMIT_FILE)
    }

    fn artifact_path(&self, path: &str) -> Result<PathBuf> {
        validate_artifact_path(path)?;
        Ok(path.split('/').fold(self.root.clone(), |p, s| p.join(s)))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let Some(bytes) = read_optional(path).map_err(|e| Error::io(path, e))? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::RecordInvalid {
                location: path.display().to_string(),
                source: e,
            })
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|e| Error::other(format!("serialize: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// `/`-joined path of `path` relative to `root`.
fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Some(parts.join("/"))
}

impl RepositoryPublisher for FileSystemPublisher {
    /// Absolute and canonical. A repository that does not exist yet is
    /// named through its canonical parent, so the id is stable once created.
    fn id(&self) -> String {
        stable_path(&self.root)
            .unwrap_or_else(|_| self.root.clone())
            .display()
            .to_string()
    }

    fn enumerate_artifacts(
        &self,
        folder_filter: PathFilter<'_>,
        file_filter: PathFilter<'_>,
    ) -> Result<Vec<String>> {
        let root = &self.root;
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                if name.starts_with('$') {
                    return false;
                }
                if entry.file_type().is_dir() {
                    return relative(root, entry.path()).is_some_and(|rel| folder_filter(&rel));
                }
                true
            });

        let mut artifacts = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| root.clone(), Path::to_path_buf);
                Error::io(path, io::Error::from(e))
            })?;
            if !entry.file_type().is_file()
                || is_temp_file(&entry.file_name().to_string_lossy())
            {
                continue;
            }
            if let Some(rel) = relative(root, entry.path()) {
                if file_filter(&rel) {
                    artifacts.push(rel);
                }
            }
        }

        artifacts.sort();
        Ok(artifacts)
    }

    fn get_change_record(&self, index: u32) -> Result<Option<ChangeRecord>> {
        self.read_json(&self.change_record_path(index))
    }

    fn store_change_record(&self, index: u32, record: &ChangeRecord) -> Result<()> {
        let path = self.change_record_path(index);
        let bytes = to_json(record)?;

        if index == CURSOR_INDEX {
            return atomic_write(&path, &bytes).map_err(|e| Error::io(&path, e));
        }

        match atomic_create(&path, &bytes) {
            Ok(()) => {
                debug!(repository = %self.root.display(), index, "Stored change record");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Error::RecordExists {
                location: self.root.display().to_string(),
                index,
            }),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    fn get_transmit_record(&self) -> Result<Option<TransmitRecord>> {
        self.read_json(&self.transmit_record_path())
    }

    fn store_transmit_record(&self, record: &TransmitRecord) -> Result<()> {
        let path = self.transmit_record_path();
        atomic_write(&path, &to_json(record)?).map_err(|e| Error::io(&path, e))
    }

    fn read_artifact(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.artifact_path(path)?;
        fs::read(&full).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ArtifactMissing {
                    location: self.root.display().to_string(),
                    artifact: path.to_string(),
                }
            } else {
                Error::io(&full, e)
            }
        })
    }

    fn write_artifact(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.artifact_path(path)?;
        atomic_write(&full, bytes).map_err(|e| Error::io(&full, e))
    }

    fn remove_artifact(&self, path: &str) -> Result<()> {
        let full = self.artifact_path(path)?;
        remove_file_and_empty_parents(&full, &self.root).map_err(|e| Error::io(&full, e))
    }
}
