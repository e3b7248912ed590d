//! Package repository synchronization.
//!
//! A repository holds artifacts at `/{id}/{version}/{file}` plus two kinds of
//! bookkeeping that never collide with artifacts because their names start
//! with `$`:
//!
//! - `$changes/{index}.json`: an append-only log of [`ChangeRecord`]s starting
//!   at index 1. Index 0 is a cursor holding the next free index.
//! - `$transmit.json`: a [`TransmitRecord`] with per-remote push/pull progress.
//!
//! [`commit`] records local changes in the log; [`push`] and [`pull`] copy the
//! unsent part of one log, and the files it names, to another repository.

mod http;
mod local;
mod records;
mod sync;

pub use http::HttpPublisher;
pub use local::FileSystemPublisher;
pub use records::{ChangeRecord, Direction, TransmitRecord, CURSOR_INDEX, FIRST_INDEX};
pub use sync::{commit, pull, push, CommitOutcome, TransmitOutcome};

use crate::error::{Error, Result};
use std::fmt;
use tracing::debug;

/// Directory holding the change log.
pub const CHANGES_DIR: &str = "$changes";

/// File holding the transmit record.
pub const TRANSMIT_FILE: &str = "$transmit.json";

/// Predicate over a `/`-separated path relative to the repository root.
pub type PathFilter<'a> = &'a dyn Fn(&str) -> bool;

/// Uniform operations over a package store.
pub trait RepositoryPublisher: Send + Sync + fmt::Debug {
    /// Stable identity, used as the key in other repositories' transmit records.
    fn id(&self) -> String;

    /// List artifact paths, sorted. Folders rejected by `folder_filter` are
    /// not descended into; any path segment starting with `$` is skipped.
    fn enumerate_artifacts(
        &self,
        folder_filter: PathFilter<'_>,
        file_filter: PathFilter<'_>,
    ) -> Result<Vec<String>>;

    fn get_change_record(&self, index: u32) -> Result<Option<ChangeRecord>>;

    /// Store a change record. Indexes from 1 up are write-once and fail with
    /// [`Error::RecordExists`]; index 0 is overwritten.
    fn store_change_record(&self, index: u32, record: &ChangeRecord) -> Result<()>;

    fn get_transmit_record(&self) -> Result<Option<TransmitRecord>>;

    fn store_transmit_record(&self, record: &TransmitRecord) -> Result<()>;

    /// Read an artifact, failing with [`Error::ArtifactMissing`] if absent.
    fn read_artifact(&self, path: &str) -> Result<Vec<u8>>;

    fn write_artifact(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Remove an artifact. Removing a missing artifact succeeds.
    fn remove_artifact(&self, path: &str) -> Result<()>;

    /// Fold records `start, start + 1, ...` up to the first gap.
    ///
    /// `None` when `start` itself is absent. The cursor is never included.
    fn merge_change_records_from(&self, start: u32) -> Result<Option<ChangeRecord>> {
        let mut index = start.max(FIRST_INDEX);
        let mut records = Vec::new();

        while let Some(record) = self.get_change_record(index)? {
            records.push(record);
            index += 1;
        }

        debug!(repository = %self.id(), start, end = index, "Merged change records");
        Ok(ChangeRecord::fold_all(&records))
    }

    /// Index at which the next change record will be stored.
    ///
    /// Taken from the cursor when present, otherwise from the log itself.
    fn next_free_index(&self) -> Result<u32> {
        if let Some(cursor) = self.get_change_record(CURSOR_INDEX)? {
            return Ok(cursor.next.max(FIRST_INDEX));
        }
        Ok(self
            .merge_change_records_from(FIRST_INDEX)?
            .map_or(FIRST_INDEX, |merged| merged.next))
    }

    /// Make this repository's files reflect `change`: copy every added path
    /// from `source`, delete every removed one.
    fn apply_file_changes(
        &self,
        change: &ChangeRecord,
        source: &dyn RepositoryPublisher,
    ) -> Result<()> {
        for path in &change.add {
            let bytes = source.read_artifact(path)?;
            self.write_artifact(path, &bytes)?;
        }
        for path in &change.remove {
            self.remove_artifact(path)?;
        }
        debug!(
            repository = %self.id(),
            source = %source.id(),
            added = change.add.len(),
            removed = change.remove.len(),
            "Applied file changes"
        );
        Ok(())
    }
}

/// Open a repository by location: an `http://` or `https://` URL, or a
/// directory path.
pub fn open_publisher(location: &str) -> Result<Box<dyn RepositoryPublisher>> {
    if is_remote(location) {
        Ok(Box::new(HttpPublisher::new(location)?))
    } else {
        Ok(Box::new(FileSystemPublisher::new(location)))
    }
}

/// Whether `location` names a remote repository.
#[must_use]
pub fn is_remote(location: &str) -> bool {
    let lower = location.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Reject artifact paths that could escape the repository or hit bookkeeping.
pub(crate) fn validate_artifact_path(path: &str) -> Result<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|segment| {
            segment.is_empty() || segment == "." || segment == ".." || segment.starts_with('$')
        });

    if invalid {
        return Err(Error::ArtifactPathInvalid {
            artifact: path.to_string(),
        });
    }
    Ok(())
}
