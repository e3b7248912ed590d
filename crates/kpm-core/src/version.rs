/// Crate version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format of `$changes/*.json` and `$transmit.json`. Also part of the data
/// directory path, so incompatible layouts never share a directory.
pub const REPOSITORY_SCHEMA_VERSION: u32 = 1;

/// One-line description printed by `kpm version`.
#[must_use]
pub fn version_string() -> String {
    format!("kpm {VERSION} (repository schema v{REPOSITORY_SCHEMA_VERSION})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        assert_eq!(
            version_string(),
            format!("kpm {} (repository schema v1)", env!("CARGO_PKG_VERSION"))
        );
    }
}
