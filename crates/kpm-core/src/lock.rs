//! Named cross-process file locks.
//!
//! A lock is an OS advisory lock on a file in [`crate::paths::lock_dir`],
//! named after the path it guards. The OS drops the lock when the holding
//! process exits, so a crashed holder cannot wedge later callers; waiters
//! still give up after a bounded number of acquire cycles.

use crate::config::LockOptions;
use crate::error::{Error, Result};
use crate::paths;
use fs2::FileExt;
use kpm_util::fs::stable_path;
use kpm_util::hash::short_hash;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

/// Longest lock name kept verbatim; longer names are shortened and hashed.
const MAX_LOCK_NAME_LEN: usize = 96;

/// A held lock. Released when dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    name: String,
    path: PathBuf,
    was_newly_created: bool,
}

impl FileLock {
    /// Acquire the lock guarding `target`, using the shared lock directory.
    pub fn acquire(target: &Path, opts: &LockOptions) -> Result<Self> {
        Self::acquire_in(&paths::lock_dir(), target, opts)
    }

    /// Acquire the lock guarding `target`, with lock files kept in `lock_dir`.
    ///
    /// Each cycle opens the lock file and tries to lock it. On contention the
    /// cycle polls until `wait_timeout` elapses, then starts over. After
    /// `max_attempts` cycles the call fails with [`Error::LockTimeout`].
    pub fn acquire_in(lock_dir: &Path, target: &Path, opts: &LockOptions) -> Result<Self> {
        let name = lock_name(target);
        let path = lock_dir.join(format!("{name}.lock"));
        fs::create_dir_all(lock_dir).map_err(|e| Error::io(lock_dir, e))?;

        let attempts = opts.max_attempts.max(1);
        for attempt in 1..=attempts {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| Error::io(&path, e))?;

            if try_lock(&file, &path)? {
                // only an uncontended first cycle counts as newly created
                let was_newly_created = attempt == 1;
                debug!(lock = %name, attempt, was_newly_created, "Acquired file lock");
                return Ok(Self {
                    file,
                    name,
                    path,
                    was_newly_created,
                });
            }

            debug!(lock = %name, attempt, "File lock is held elsewhere, waiting");
            let deadline = Instant::now() + opts.wait_timeout;
            while Instant::now() < deadline {
                std::thread::sleep(opts.poll_interval);
                if try_lock(&file, &path)? {
                    debug!(lock = %name, attempt, "Acquired file lock after waiting");
                    return Ok(Self {
                        file,
                        name,
                        path,
                        was_newly_created: false,
                    });
                }
            }

            warn!(lock = %name, attempt, attempts, "Timed out waiting for file lock, retrying");
        }

        Err(Error::LockTimeout { name, attempts })
    }

    /// Whether the lock was free when first tried.
    #[must_use]
    pub fn was_newly_created(&self) -> bool {
        self.was_newly_created
    }

    /// The derived lock name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.name, error = %e, "Failed to release file lock");
        }
    }
}

fn try_lock(file: &File, path: &Path) -> Result<bool> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(true),
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Derive a stable, filesystem-legal lock name from a path.
///
/// The path is resolved through [`stable_path`], so different spellings of
/// the same location share a lock, and the name does not change when the
/// target is created. Separators and other unsafe characters become `_`;
/// over-long names keep their tail plus a hash of the whole path.
#[must_use]
pub fn lock_name(target: &Path) -> String {
    let resolved = stable_path(target).unwrap_or_else(|_| target.to_path_buf());
    let full = resolved.to_string_lossy();

    let sanitized: String = full
        .trim_start_matches(['/', '\\'])
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.len() <= MAX_LOCK_NAME_LEN {
        return sanitized;
    }

    let tail_start = sanitized.len() - 64;
    format!(
        "{}-{}",
        &sanitized[tail_start..],
        short_hash(full.as_bytes(), 16)
    )
}

/// Run `action` while holding the lock guarding `path`.
///
/// `action` receives whether the lock was uncontended. The lock is released
/// on every exit path, including errors and panics.
pub fn with_file_lock<T>(
    path: &Path,
    opts: &LockOptions,
    action: impl FnOnce(bool) -> Result<T>,
) -> Result<T> {
    with_file_lock_in(&paths::lock_dir(), path, opts, action)
}

/// [`with_file_lock`] with an explicit lock directory.
pub fn with_file_lock_in<T>(
    lock_dir: &Path,
    path: &Path,
    opts: &LockOptions,
    action: impl FnOnce(bool) -> Result<T>,
) -> Result<T> {
    let lock = FileLock::acquire_in(lock_dir, path, opts)?;
    action(lock.was_newly_created())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn fast_opts() -> LockOptions {
        LockOptions {
            wait_timeout: Duration::from_secs(5),
            max_attempts: 3,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_lock_name_replaces_separators() {
        let name = lock_name(Path::new("/no/such/dir/repo"));
        assert_eq!(name, "no_such_dir_repo");
        assert!(!name.contains('/'));

        let windows = lock_name(Path::new(r"C:\no\such\repo"));
        assert!(!windows.contains('\\'));
        assert!(!windows.contains(':'));
    }

    #[test]
    fn test_lock_name_is_stable_and_bounded() {
        let long = format!("/no/such/{}", "segment/".repeat(40));
        let a = lock_name(Path::new(&long));
        let b = lock_name(Path::new(&long));
        assert_eq!(a, b);
        assert!(a.len() <= MAX_LOCK_NAME_LEN);

        let other = lock_name(Path::new(&format!("{long}x")));
        assert_ne!(a, other);
    }

    #[test]
    fn test_lock_name_unchanged_when_target_appears() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("repo").join("$transmit.json");

        let before = lock_name(&target);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"{}").unwrap();
        assert_eq!(lock_name(&target), before);
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_name_resolves_symlinked_parent() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        let link = dir.path().join("link");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let through_link = lock_name(&link.join("$transmit.json"));
        fs::write(real.join("$transmit.json"), b"{}").unwrap();
        assert_eq!(lock_name(&link.join("$transmit.json")), through_link);
        assert_eq!(lock_name(&real.join("$transmit.json")), through_link);
    }

    #[test]
    fn test_uncontended_lock_is_newly_created() {
        let dir = tempdir().unwrap();
        let locks = dir.path().join("locks");
        let target = dir.path().join("repo");

        let newly = with_file_lock_in(&locks, &target, &fast_opts(), Ok).unwrap();
        assert!(newly);

        // released, so the next caller is uncontended too
        let again = with_file_lock_in(&locks, &target, &fast_opts(), Ok).unwrap();
        assert!(again);
    }

    #[test]
    fn test_concurrent_callers_are_exclusive() {
        let dir = tempdir().unwrap();
        let locks = dir.path().join("locks");
        let target = dir.path().join("repo");
        let inside = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let holder = {
            let locks = locks.clone();
            let target = target.clone();
            let inside = Arc::clone(&inside);
            thread::spawn(move || {
                with_file_lock_in(&locks, &target, &fast_opts(), |newly| {
                    inside.store(true, Ordering::SeqCst);
                    tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(200));
                    inside.store(false, Ordering::SeqCst);
                    Ok(newly)
                })
                .unwrap()
            })
        };

        rx.recv().unwrap();
        let second = with_file_lock_in(&locks, &target, &fast_opts(), |newly| {
            assert!(
                !inside.load(Ordering::SeqCst),
                "actions must never overlap"
            );
            Ok(newly)
        })
        .unwrap();

        assert!(holder.join().unwrap());
        assert!(!second);
    }

    #[test]
    fn test_timeout_after_bounded_attempts() {
        let dir = tempdir().unwrap();
        let locks = dir.path().join("locks");
        let target = dir.path().join("repo");
        let _held = FileLock::acquire_in(&locks, &target, &fast_opts()).unwrap();

        let opts = LockOptions {
            wait_timeout: Duration::from_millis(30),
            max_attempts: 2,
            poll_interval: Duration::from_millis(5),
        };
        let err = FileLock::acquire_in(&locks, &target, &opts).unwrap_err();
        match err {
            Error::LockTimeout { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected lock timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_released_when_action_fails() {
        let dir = tempdir().unwrap();
        let locks = dir.path().join("locks");
        let target = dir.path().join("repo");

        let result: Result<()> = with_file_lock_in(&locks, &target, &fast_opts(), |_| {
            Err(Error::other("boom"))
        });
        assert!(result.is_err());

        let newly = with_file_lock_in(&locks, &target, &fast_opts(), Ok).unwrap();
        assert!(newly);
    }
}
