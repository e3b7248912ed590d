//! BLAKE3 digests for cache invalidation and lock names.

use std::fs::File;
use std::io;
use std::path::Path;

/// Hex digest of a file's content.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn digest_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(File::open(path)?)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hex digest of an ordered list of entries. Entries are length-prefixed,
/// so `["ab", "c"]` and `["a", "bc"]` differ.
#[must_use]
pub fn digest_entries<'a>(entries: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = blake3::Hasher::new();
    for entry in entries {
        hasher.update(&(entry.len() as u64).to_le_bytes());
        hasher.update(entry.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// `len` hex characters identifying `data`, for names that must stay short.
#[must_use]
pub fn short_hash(data: &[u8], len: usize) -> String {
    let hex = blake3::hash(data).to_hex();
    let hex = hex.as_str();
    hex[..len.min(hex.len())].to_string()
}
