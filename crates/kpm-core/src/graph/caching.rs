use super::{ExportTarget, GraphItem, LibraryExport, LibraryExporter, ReferenceContent};
use crate::cache::{Cache, DirectoryDependency, FileDependency, LibraryCacheKey, NamedTriggers};
use crate::error::Result;

/// Memoizes another exporter per `(name, version, framework, aspect)`.
///
/// Each entry depends on the content of every file it references, on the
/// listing of the library's directory so new or deleted files are noticed,
/// and on a named trigger per library so callers can force a re-export.
#[derive(Debug)]
pub struct CachingExporter<E> {
    inner: E,
    cache: Cache<LibraryCacheKey, LibraryExport>,
    triggers: NamedTriggers,
}

impl<E: LibraryExporter> CachingExporter<E> {
    #[must_use]
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: Cache::new(),
            triggers: NamedTriggers::new(),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Invalidate every cached export of library `name`.
    pub fn invalidate_library(&self, name: &str) {
        self.triggers.trigger(name);
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<E: LibraryExporter> LibraryExporter for CachingExporter<E> {
    fn export(&self, library: &GraphItem, target: &ExportTarget) -> Result<LibraryExport> {
        let identity = library.identity();
        let key = LibraryCacheKey::new(
            &identity.name,
            identity.version.to_string(),
            target.framework.as_str(),
            &target.aspect,
        );

        self.cache.try_get(key, |ctx| {
            ctx.monitor(self.triggers.dependency(&identity.name));
            ctx.monitor(DirectoryDependency::shared(&library.library.path));
            let export = self.inner.export(library, target)?;
            for reference in export
                .metadata_references
                .iter()
                .chain(&export.source_references)
            {
                if let ReferenceContent::Path(path) = &reference.content {
                    ctx.monitor(FileDependency::shared(path));
                }
            }
            Ok(export)
        })
    }
}
