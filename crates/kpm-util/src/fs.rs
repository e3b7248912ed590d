use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

const TEMP_MARKER: &str = ".tmp.";

/// Temp sibling used for write-then-rename. Same directory keeps the rename on one filesystem.
fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent.join(format!(".{name}{TEMP_MARKER}{}.{n}", std::process::id()))
}

/// Whether `file_name` is a staging file left by [`atomic_write`] or
/// [`atomic_create`], either in flight or abandoned by a crash.
#[must_use]
pub fn is_temp_file(file_name: &str) -> bool {
    let Some(rest) = file_name.strip_prefix('.') else {
        return false;
    };
    let Some((_, suffix)) = rest.rsplit_once(TEMP_MARKER) else {
        return false;
    };
    suffix
        .split_once('.')
        .is_some_and(|(pid, n)| {
            !pid.is_empty()
                && !n.is_empty()
                && pid.bytes().all(|b| b.is_ascii_digit())
                && n.bytes().all(|b| b.is_ascii_digit())
        })
}

/// Absolute form of `path` that does not change when `path` is created.
///
/// An existing path is canonicalized. Otherwise the parent is
/// canonicalized and the file name appended, so a symlinked parent
/// resolves the same way before and after the file appears.
///
/// # Errors
/// Returns an error if the current directory cannot be read.
pub fn stable_path(path: &Path) -> io::Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let absolute = std::path::absolute(path)?;
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
        if let Ok(parent) = stable_path(parent) {
            return Ok(parent.join(name));
        }
    }
    Ok(absolute)
}

fn write_temp(temp: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Atomically replace the contents of `path`, creating parent directories.
///
/// Readers observe either the old or the new contents, never a partial write.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_sibling(path);
    write_temp(&temp, bytes)?;

    match fs::rename(&temp, path) {
        Ok(()) => Ok(()),
        Err(e) if cfg!(windows) => {
            // rename fails on Windows when the target exists
            let result = fs::copy(&temp, path).map(|_| ());
            let _ = fs::remove_file(&temp);
            result.map_err(|_| e)
        }
        Err(e) => {
            let _ = fs::remove_file(&temp);
            Err(e)
        }
    }
}

/// Atomically create `path` with `bytes`, failing if it already exists.
///
/// The contents are staged in a temp file and published with a hard link,
/// which refuses to clobber an existing target.
///
/// # Errors
/// Returns `io::ErrorKind::AlreadyExists` if `path` exists, or any I/O error.
pub fn atomic_create(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_sibling(path);
    write_temp(&temp, bytes)?;
    let result = fs::hard_link(&temp, path);
    let _ = fs::remove_file(&temp);
    result
}

/// Read a file, mapping "not found" to `None`.
///
/// # Errors
/// Returns any I/O error other than `NotFound`.
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a file, then remove any parent directories left empty, up to `stop`.
///
/// A missing file is not an error.
///
/// # Errors
/// Returns an error if the file exists but cannot be removed.
pub fn remove_file_and_empty_parents(path: &Path, stop: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        // non-empty directories fail to remove; that ends the walk
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }

    Ok(())
}
