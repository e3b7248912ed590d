//! Commit, push and pull.

use super::{
    ChangeRecord, Direction, FileSystemPublisher, RepositoryPublisher, CURSOR_INDEX, FIRST_INDEX,
};
use crate::config::LockOptions;
use crate::error::Result;
use crate::lock::with_file_lock;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Result of [`commit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// The log already describes the files on disk.
    UpToDate,
    Committed {
        index: u32,
        added: usize,
        removed: usize,
    },
}

/// Result of [`push`] or [`pull`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransmitOutcome {
    /// Nothing new to send.
    UpToDate,
    Transmitted {
        /// Index the changes were stored at in the receiving repository.
        index: u32,
        added: usize,
        removed: usize,
    },
}

/// Record the difference between the files in `repo` and its change log.
///
/// Paths on disk but not in the log are added; paths in the log but gone
/// from disk are removed. The new record goes at the log's next index and
/// the cursor is advanced. Runs under the repository's file lock.
pub fn commit(repo: &FileSystemPublisher, lock: &LockOptions) -> Result<CommitOutcome> {
    with_file_lock(repo.root(), lock, |_| commit_unlocked(repo))
}

fn commit_unlocked(repo: &dyn RepositoryPublisher) -> Result<CommitOutcome> {
    let artifacts: BTreeSet<String> = repo
        .enumerate_artifacts(&|_| true, &|_| true)?
        .into_iter()
        .collect();
    let index = repo
        .merge_change_records_from(FIRST_INDEX)?
        .unwrap_or_else(|| ChangeRecord::empty(FIRST_INDEX));

    let change = ChangeRecord {
        next: index.next + 1,
        add: artifacts.difference(&index.add).cloned().collect(),
        remove: index.add.difference(&artifacts).cloned().collect(),
    };

    if change.is_empty() {
        debug!(repository = %repo.id(), artifacts = artifacts.len(), "Nothing to commit");
        return Ok(CommitOutcome::UpToDate);
    }

    let at = index.next;
    repo.store_change_record(at, &change)?;
    repo.store_change_record(CURSOR_INDEX, &ChangeRecord::empty(change.next))?;

    info!(
        repository = %repo.id(),
        index = at,
        added = change.add.len(),
        removed = change.remove.len(),
        "Committed changes"
    );
    Ok(CommitOutcome::Committed {
        index: at,
        added: change.add.len(),
        removed: change.remove.len(),
    })
}

/// Send the changes `remote` has not seen from `local`'s log, with their files.
pub fn push(
    local: &FileSystemPublisher,
    remote: &dyn RepositoryPublisher,
    lock: &LockOptions,
) -> Result<TransmitOutcome> {
    with_transfer_locks(local, lock, || transmit(local, remote, Direction::Push))
}

/// Fetch the changes of `remote`'s log that `local` has not seen, with their files.
pub fn pull(
    local: &FileSystemPublisher,
    remote: &dyn RepositoryPublisher,
    lock: &LockOptions,
) -> Result<TransmitOutcome> {
    with_transfer_locks(local, lock, || transmit(local, remote, Direction::Pull))
}

/// Hold the repository lock, then the transmit-record lock. Transfers read
/// and write the same log and files as [`commit`], so they exclude it; the
/// fixed order keeps concurrent commits and transfers from deadlocking.
fn with_transfer_locks<T>(
    local: &FileSystemPublisher,
    lock: &LockOptions,
    action: impl FnOnce() -> Result<T>,
) -> Result<T> {
    with_file_lock(local.root(), lock, |_| {
        with_file_lock(&local.transmit_record_path(), lock, |_| action())
    })
}

/// Shared push/pull. Bookkeeping always lives in `local`'s transmit record
/// and is persisted last, so a failure leaves it untouched and the transfer
/// is retried from the same index next time.
fn transmit(
    local: &dyn RepositoryPublisher,
    remote: &dyn RepositoryPublisher,
    direction: Direction,
) -> Result<TransmitOutcome> {
    let (source, target) = match direction {
        Direction::Push => (local, remote),
        Direction::Pull => (remote, local),
    };
    let remote_id = remote.id();

    let mut transmit = local.get_transmit_record()?.unwrap_or_default();
    let start = transmit.next_index(direction, &remote_id);

    let Some(change) = source.merge_change_records_from(start)? else {
        debug!(direction = direction.as_str(), remote = %remote_id, start, "Up to date");
        return Ok(TransmitOutcome::UpToDate);
    };

    if change.is_empty() {
        transmit.set_next_index(direction, &remote_id, change.next);
        local.store_transmit_record(&transmit)?;
        return Ok(TransmitOutcome::UpToDate);
    }

    let at = target.next_free_index()?;
    target.apply_file_changes(&change, source)?;
    let stored = change.stored_at(at);
    target.store_change_record(at, &stored)?;
    target.store_change_record(CURSOR_INDEX, &ChangeRecord::empty(stored.next))?;

    transmit.set_next_index(direction, &remote_id, change.next);
    // the record just written to `target` is ours; never send it back
    let back = direction.opposite();
    if transmit.next_index(back, &remote_id) == at {
        transmit.set_next_index(back, &remote_id, stored.next);
    }
    local.store_transmit_record(&transmit)?;

    info!(
        direction = direction.as_str(),
        remote = %remote_id,
        from = start,
        index = at,
        added = change.add.len(),
        removed = change.remove.len(),
        "Transmitted changes"
    );
    Ok(TransmitOutcome::Transmitted {
        index: at,
        added: change.add.len(),
        removed: change.remove.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::http::test_server::TestServer;
    use crate::repository::TransmitRecord;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn opts() -> LockOptions {
        LockOptions {
            wait_timeout: Duration::from_secs(2),
            max_attempts: 2,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| (*p).to_string()).collect()
    }

    fn repo() -> (TempDir, FileSystemPublisher) {
        let dir = tempdir().unwrap();
        let publisher = FileSystemPublisher::new(dir.path());
        (dir, publisher)
    }

    #[test]
    fn test_commit_diff() {
        let (dir, repo) = repo();
        write(dir.path(), "p1", "1");
        write(dir.path(), "p2", "2");
        repo.store_change_record(1, &ChangeRecord {
            next: 2,
            add: set(&["p1", "p2"]),
            remove: BTreeSet::new(),
        })
        .unwrap();

        fs::remove_file(dir.path().join("p2")).unwrap();
        write(dir.path(), "p3", "3");

        let outcome = commit(&repo, &opts()).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                index: 2,
                added: 1,
                removed: 1
            }
        );

        let record = repo.get_change_record(2).unwrap().unwrap();
        assert_eq!(record.add, set(&["p3"]));
        assert_eq!(record.remove, set(&["p2"]));
        assert_eq!(record.next, 3);
        assert_eq!(repo.get_change_record(0).unwrap().unwrap().next, 3);

        assert_eq!(commit(&repo, &opts()).unwrap(), CommitOutcome::UpToDate);
    }

    #[test]
    fn test_first_commit_of_empty_log() {
        let (dir, repo) = repo();
        write(dir.path(), "Json/6.0.1/Json.nupkg", "pkg");

        let outcome = commit(&repo, &opts()).unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { index: 1, .. }));
        assert_eq!(repo.next_free_index().unwrap(), 2);
    }

    #[test]
    fn test_push_is_resumable() {
        let (a_dir, a) = repo();
        let (b_dir, b) = repo();
        write(a_dir.path(), "p1", "one");
        write(a_dir.path(), "p2", "two");
        a.store_change_record(1, &ChangeRecord {
            next: 2,
            add: set(&["p1", "p2"]),
            remove: BTreeSet::new(),
        })
        .unwrap();

        let outcome = push(&a, &b, &opts()).unwrap();
        assert_eq!(
            outcome,
            TransmitOutcome::Transmitted {
                index: 1,
                added: 2,
                removed: 0
            }
        );
        assert_eq!(fs::read_to_string(b_dir.path().join("p1")).unwrap(), "one");
        assert_eq!(fs::read_to_string(b_dir.path().join("p2")).unwrap(), "two");

        let transmit = a.get_transmit_record().unwrap().unwrap();
        assert_eq!(transmit.next_index(Direction::Push, &b.id()), 2);
        assert_eq!(b.get_change_record(1).unwrap().unwrap().add, set(&["p1", "p2"]));
        assert_eq!(b.next_free_index().unwrap(), 2);

        assert_eq!(push(&a, &b, &opts()).unwrap(), TransmitOutcome::UpToDate);
        assert!(b.get_change_record(2).unwrap().is_none());
    }

    #[test]
    fn test_push_renumbers_into_remote_log() {
        let (a_dir, a) = repo();
        let (b_dir, b) = repo();
        write(b_dir.path(), "theirs", "t");
        commit(&b, &opts()).unwrap();

        write(a_dir.path(), "mine", "m");
        commit(&a, &opts()).unwrap();

        let outcome = push(&a, &b, &opts()).unwrap();
        assert!(matches!(outcome, TransmitOutcome::Transmitted { index: 2, .. }));
        assert_eq!(b.get_change_record(2).unwrap().unwrap().next, 3);
        assert_eq!(b.get_change_record(0).unwrap().unwrap().next, 3);

        // B's own record 1 was never seen by A, so the pull cursor stays
        let transmit = a.get_transmit_record().unwrap().unwrap();
        assert_eq!(transmit.next_index(Direction::Pull, &b.id()), 1);
    }

    #[test]
    fn test_pull_then_push_does_not_echo() {
        let (a_dir, a) = repo();
        let (b_dir, b) = repo();
        write(b_dir.path(), "Json/6.0.1/Json.nupkg", "pkg");
        commit(&b, &opts()).unwrap();

        let pulled = pull(&a, &b, &opts()).unwrap();
        assert!(matches!(pulled, TransmitOutcome::Transmitted { index: 1, added: 1, .. }));
        assert!(a_dir.path().join("Json/6.0.1/Json.nupkg").is_file());

        let transmit = a.get_transmit_record().unwrap().unwrap();
        assert_eq!(transmit.next_index(Direction::Pull, &b.id()), 2);
        assert_eq!(transmit.next_index(Direction::Push, &b.id()), 2);

        assert_eq!(push(&a, &b, &opts()).unwrap(), TransmitOutcome::UpToDate);
        assert_eq!(pull(&a, &b, &opts()).unwrap(), TransmitOutcome::UpToDate);
        assert_eq!(commit(&a, &opts()).unwrap(), CommitOutcome::UpToDate);
    }

    #[test]
    fn test_pull_applies_removals() {
        let (a_dir, a) = repo();
        let (b_dir, b) = repo();
        write(b_dir.path(), "x/1.0.0/x.nupkg", "x");
        commit(&b, &opts()).unwrap();
        pull(&a, &b, &opts()).unwrap();

        fs::remove_file(b_dir.path().join("x/1.0.0/x.nupkg")).unwrap();
        commit(&b, &opts()).unwrap();

        let outcome = pull(&a, &b, &opts()).unwrap();
        assert!(matches!(outcome, TransmitOutcome::Transmitted { removed: 1, .. }));
        assert!(!a_dir.path().join("x").exists());
    }

    #[test]
    fn test_failed_push_leaves_bookkeeping() {
        let (a_dir, a) = repo();
        let (_b_dir, b) = repo();
        a.store_change_record(1, &ChangeRecord {
            next: 2,
            add: set(&["missing-file"]),
            remove: BTreeSet::new(),
        })
        .unwrap();

        let err = push(&a, &b, &opts()).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::ARTIFACT_MISSING);
        assert!(a.get_transmit_record().unwrap().is_none());
        assert!(b.get_change_record(1).unwrap().is_none());

        write(a_dir.path(), "missing-file", "now here");
        assert!(matches!(
            push(&a, &b, &opts()).unwrap(),
            TransmitOutcome::Transmitted { index: 1, .. }
        ));
    }

    #[test]
    fn test_pull_waits_for_repository_lock() {
        let (_a_dir, a) = repo();
        let (b_dir, b) = repo();
        write(b_dir.path(), "Json/6.0.1/Json.nupkg", "pkg");
        commit(&b, &opts()).unwrap();

        let _held = crate::lock::FileLock::acquire(a.root(), &opts()).unwrap();
        let quick = LockOptions {
            wait_timeout: Duration::from_millis(30),
            max_attempts: 1,
            poll_interval: Duration::from_millis(5),
        };

        let err = pull(&a, &b, &quick).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::LOCK_TIMEOUT);
        assert!(a.get_transmit_record().unwrap().is_none());
        assert!(a.get_change_record(1).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_commit_and_pull() {
        let (a_dir, a) = repo();
        let (b_dir, b) = repo();
        for i in 0..20 {
            write(b_dir.path(), &format!("remote/{i}/r.nupkg"), "r");
        }
        commit(&b, &opts()).unwrap();

        let patient = LockOptions {
            wait_timeout: Duration::from_secs(10),
            max_attempts: 3,
            poll_interval: Duration::from_millis(2),
        };
        let barrier = std::sync::Barrier::new(2);

        std::thread::scope(|scope| {
            let puller = scope.spawn(|| {
                barrier.wait();
                pull(&a, &b, &patient)
            });
            let committer = scope.spawn(|| {
                barrier.wait();
                for i in 0..5 {
                    write(a_dir.path(), &format!("local/{i}/l.nupkg"), "l");
                    commit(&a, &patient)?;
                }
                Ok::<(), crate::error::Error>(())
            });

            assert!(matches!(
                puller.join().unwrap().unwrap(),
                TransmitOutcome::Transmitted { added: 20, .. }
            ));
            committer.join().unwrap().unwrap();
        });

        // every file on disk is described by a contiguous log
        assert_eq!(commit(&a, &opts()).unwrap(), CommitOutcome::UpToDate);
        let merged = a.merge_change_records_from(FIRST_INDEX).unwrap().unwrap();
        assert_eq!(merged.add.len(), 25);
        assert_eq!(a.next_free_index().unwrap(), merged.next);
    }

    #[test]
    fn test_push_and_pull_over_http() {
        let server = TestServer::start();
        let remote = server.publisher();
        let (a_dir, a) = repo();
        let (c_dir, c) = repo();

        write(a_dir.path(), "Json/6.0.1/Json.nupkg", "pkg");
        commit(&a, &opts()).unwrap();
        assert!(matches!(
            push(&a, &remote, &opts()).unwrap(),
            TransmitOutcome::Transmitted { index: 1, .. }
        ));
        assert!(server.has("Json/6.0.1/Json.nupkg"));
        assert!(server.has("$changes/0.json"));

        assert!(matches!(
            pull(&c, &remote, &opts()).unwrap(),
            TransmitOutcome::Transmitted { index: 1, added: 1, .. }
        ));
        assert_eq!(
            fs::read_to_string(c_dir.path().join("Json/6.0.1/Json.nupkg")).unwrap(),
            "pkg"
        );

        let transmit: TransmitRecord = c.get_transmit_record().unwrap().unwrap();
        assert_eq!(transmit.next_index(Direction::Pull, &remote.id()), 2);
    }
}
