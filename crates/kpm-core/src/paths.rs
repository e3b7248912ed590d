use crate::config::Channel;
use crate::version::REPOSITORY_SCHEMA_VERSION;
use std::path::PathBuf;

/// Environment variable overriding the shared lock directory (used by tests).
pub const LOCK_DIR_ENV: &str = "KPM_LOCK_DIR";

/// Environment variable overriding the default package folder.
pub const PACKAGES_DIR_ENV: &str = "KPM_PACKAGES";

/// Directory holding named lock files shared by every kpm process on the machine.
///
/// Lock names derive from the guarded path, not the channel, so different
/// channels still exclude each other on the same repository.
#[must_use]
pub fn lock_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(LOCK_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    std::env::temp_dir().join("kpm").join("locks")
}

/// Get the data directory for kpm.
///
/// - Linux: `$XDG_DATA_HOME/kpm/v{N}/{channel}` or `~/.local/share/kpm/v{N}/{channel}`
/// - macOS: `~/Library/Application Support/kpm/v{N}/{channel}`
/// - Windows: `%APPDATA%\kpm\v{N}\{channel}`
#[must_use]
pub fn data_dir(channel: Channel) -> PathBuf {
    let base = dirs_next::data_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".kpm-data"),
                |p| p.join(".local").join("share").join("kpm"),
            )
        },
        |p| p.join("kpm"),
    );

    base.join(format!("v{REPOSITORY_SCHEMA_VERSION}"))
        .join(channel.as_str())
}

/// Default package folder used when no `--packages` directory is given.
#[must_use]
pub fn packages_dir(channel: Channel) -> PathBuf {
    if let Ok(dir) = std::env::var(PACKAGES_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    data_dir(channel).join("packages")
}
