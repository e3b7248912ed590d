use super::{GraphItem, LibraryRange};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Precedence of a provider. Lower values are asked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPriority {
    /// Local projects shadow packages of the same name.
    Project = 0,
    Package = 1,
}

/// Source of libraries for the walker.
pub trait LibraryProvider: Send + Sync + std::fmt::Debug {
    /// Short label recorded on every match this provider returns.
    fn name(&self) -> &str;

    fn priority(&self) -> ProviderPriority;

    /// Supply a library satisfying `range`, or `None` if this provider has none.
    ///
    /// An error is reported as a diagnostic and the next provider is asked.
    fn try_resolve(&self, range: &LibraryRange) -> Result<Option<GraphItem>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projects_sort_before_packages() {
        let mut priorities = vec![ProviderPriority::Package, ProviderPriority::Project];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![ProviderPriority::Project, ProviderPriority::Package]
        );
    }
}
