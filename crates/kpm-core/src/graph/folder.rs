//! Providers and exporter backed by plain directories.
//!
//! Projects live at `{root}/{name}/project.json`. Packages live at
//! `{root}/{name}/{version}/{name}.manifest.json`, with compiled outputs under
//! `lib/{framework}/` and shared sources under `shared/`.

use super::{
    ExportTarget, FrameworkId, GraphItem, LibraryExport, LibraryExporter, LibraryIdentity,
    LibraryProvider, LibraryRange, LibraryType, ProviderMatch, ProviderPriority, Reference,
};
use crate::error::{Error, Result};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// File name of a project manifest.
pub const PROJECT_FILE: &str = "project.json";

/// Suffix of a package manifest, after the package name.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Manifest shared by projects and packages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    /// Dependencies for every framework: `name -> version range`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub frameworks: BTreeMap<String, FrameworkSection>,
}

/// Framework-specific part of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkSection {
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| Error::ManifestInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn parsed_version(&self, path: &Path) -> Result<Version> {
        Version::parse(self.version.trim()).map_err(|e| Error::ManifestInvalid {
            path: path.to_path_buf(),
            message: format!("invalid version '{}': {e}", self.version),
        })
    }

    /// Dependency requests for `framework`: the common list plus the
    /// framework's own, the latter overriding on a shared name. Sorted by name.
    pub fn dependency_ranges(
        &self,
        framework: &FrameworkId,
        path: &Path,
    ) -> Result<Vec<LibraryRange>> {
        let mut merged: BTreeMap<&str, &str> = self
            .dependencies
            .iter()
            .map(|(n, r)| (n.as_str(), r.as_str()))
            .collect();
        if let Some(section) = self.frameworks.get(framework.as_str()) {
            for (name, range) in &section.dependencies {
                merged.insert(name.as_str(), range.as_str());
            }
        }

        merged
            .into_iter()
            .map(|(name, range)| {
                let version_req = parse_range(range).map_err(|e| Error::ManifestInvalid {
                    path: path.to_path_buf(),
                    message: format!("invalid range '{range}' for {name}: {e}"),
                })?;
                Ok(LibraryRange::new(name, version_req, framework.clone()))
            })
            .collect()
    }
}

fn parse_range(range: &str) -> std::result::Result<VersionReq, semver::Error> {
    let range = range.trim();
    if range.is_empty() {
        return Ok(VersionReq::STAR);
    }
    VersionReq::parse(range)
}

/// A library name must be one plain path component.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

/// Local projects. Matched by name; a project always shadows packages.
#[derive(Debug, Clone)]
pub struct ProjectProvider {
    root: PathBuf,
}

impl ProjectProvider {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LibraryProvider for ProjectProvider {
    fn name(&self) -> &str {
        "projects"
    }

    fn priority(&self) -> ProviderPriority {
        ProviderPriority::Project
    }

    fn try_resolve(&self, range: &LibraryRange) -> Result<Option<GraphItem>> {
        if !is_plain_name(&range.name) {
            return Ok(None);
        }
        let dir = self.root.join(&range.name);
        let manifest_path = dir.join(PROJECT_FILE);
        if !manifest_path.is_file() {
            return Ok(None);
        }

        let manifest = Manifest::read(&manifest_path)?;
        let version = manifest.parsed_version(&manifest_path)?;
        let dependencies = manifest.dependency_ranges(&range.framework, &manifest_path)?;
        trace!(project = %range.name, %version, "Found project");

        Ok(Some(GraphItem {
            library: ProviderMatch {
                identity: LibraryIdentity::new(&range.name, version),
                provider: self.name().to_string(),
                path: dir,
                library_type: LibraryType::Project,
            },
            dependencies,
        }))
    }
}

/// A folder of unpacked packages, one directory per version.
#[derive(Debug, Clone)]
pub struct PackageFolderProvider {
    root: PathBuf,
}

impl PackageFolderProvider {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Installed versions of `name` with their directories, unsorted.
    fn versions(&self, name: &str) -> Result<Vec<(Version, PathBuf)>> {
        let dir = self.root.join(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&dir, e)),
        };

        Ok(entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let version = Version::parse(&entry.file_name().to_string_lossy()).ok()?;
                Some((version, entry.path()))
            })
            .collect())
    }
}

impl LibraryProvider for PackageFolderProvider {
    fn name(&self) -> &str {
        "packages"
    }

    fn priority(&self) -> ProviderPriority {
        ProviderPriority::Package
    }

    /// Picks the highest installed version satisfying the range.
    fn try_resolve(&self, range: &LibraryRange) -> Result<Option<GraphItem>> {
        if !is_plain_name(&range.name) {
            return Ok(None);
        }
        let Some((version, dir)) = self
            .versions(&range.name)?
            .into_iter()
            .filter(|(v, _)| range.matches(v))
            .max_by(|a, b| a.0.cmp(&b.0))
        else {
            return Ok(None);
        };

        let manifest_path = dir.join(format!("{}{MANIFEST_SUFFIX}", range.name));
        let manifest = Manifest::read(&manifest_path)?;
        let dependencies = manifest.dependency_ranges(&range.framework, &manifest_path)?;
        trace!(package = %range.name, %version, "Found package");

        Ok(Some(GraphItem {
            library: ProviderMatch {
                identity: LibraryIdentity::new(&range.name, version),
                provider: self.name().to_string(),
                path: dir,
                library_type: LibraryType::Package,
            },
            dependencies,
        }))
    }
}

/// Exports files from a library directory.
///
/// Every file directly under `lib/{framework}/` is a metadata reference named
/// by its file stem. Every file under `shared/` is a source reference named by
/// its `/`-separated path relative to `shared/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageFolderExporter;

impl PackageFolderExporter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LibraryExporter for PackageFolderExporter {
    fn export(&self, library: &GraphItem, target: &ExportTarget) -> Result<LibraryExport> {
        let base = &library.library.path;
        Ok(LibraryExport {
            metadata_references: metadata_files(
                &base.join("lib").join(target.framework.as_str()),
            )?,
            source_references: source_files(&base.join("shared"))?,
        })
    }
}

fn metadata_files(dir: &Path) -> Result<Vec<Reference>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    Ok(files
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_string_lossy().to_string();
            Some(Reference::path(stem, path))
        })
        .collect())
}

fn source_files(dir: &Path) -> Result<Vec<Reference>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut references = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| dir.to_path_buf(), Path::to_path_buf);
            Error::io(path, io::Error::from(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        references.push(Reference::path(name, entry.path()));
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictPolicy;
    use crate::graph::{get_exports, resolve_conflicts, DependencyWalker, ReferenceContent};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn fw() -> FrameworkId {
        FrameworkId::new("net45")
    }

    fn write_json(path: &Path, value: &serde_json::Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn write_package(root: &Path, name: &str, version: &str, manifest: serde_json::Value) {
        let dir = root.join(name).join(version);
        write_json(&dir.join(format!("{name}{MANIFEST_SUFFIX}")), &manifest);
    }

    #[test]
    fn test_manifest_framework_dependencies() {
        let manifest: Manifest = serde_json::from_value(json!({
            "version": "1.0.0",
            "dependencies": { "Common": "^1", "Logging": "^1" },
            "frameworks": {
                "net45": { "dependencies": { "Logging": "^2", "Desktop": "" } },
                "dnxcore50": { "dependencies": { "Core": "*" } }
            }
        }))
        .unwrap();

        let ranges = manifest
            .dependency_ranges(&fw(), Path::new("project.json"))
            .unwrap();
        let rendered: Vec<String> = ranges
            .iter()
            .map(|r| format!("{} {}", r.name, r.version_req))
            .collect();
        assert_eq!(rendered, vec!["Common ^1", "Desktop *", "Logging ^2"]);
    }

    #[test]
    fn test_manifest_invalid_range() {
        let manifest: Manifest = serde_json::from_value(json!({
            "version": "1.0.0",
            "dependencies": { "Bad": "not a range" }
        }))
        .unwrap();

        let err = manifest
            .dependency_ranges(&fw(), Path::new("p.json"))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::codes::MANIFEST_INVALID);
    }

    #[test]
    fn test_package_provider_picks_highest_match() {
        let dir = tempdir().unwrap();
        for version in ["1.0.0", "1.4.0", "2.0.0"] {
            write_package(dir.path(), "Json", version, json!({ "version": version }));
        }
        fs::create_dir_all(dir.path().join("Json").join("not-a-version")).unwrap();

        let provider = PackageFolderProvider::new(dir.path());
        let range = LibraryRange::new("Json", VersionReq::parse("^1").unwrap(), fw());
        let item = provider.try_resolve(&range).unwrap().unwrap();

        assert_eq!(item.identity().version, Version::new(1, 4, 0));
        assert_eq!(item.library.library_type, LibraryType::Package);
        assert_eq!(item.library.path, dir.path().join("Json").join("1.4.0"));

        let none = LibraryRange::new("Json", VersionReq::parse("^3").unwrap(), fw());
        assert!(provider.try_resolve(&none).unwrap().is_none());

        let missing = LibraryRange::new("Other", VersionReq::STAR, fw());
        assert!(provider.try_resolve(&missing).unwrap().is_none());
    }

    #[test]
    fn test_package_provider_rejects_path_names() {
        let dir = tempdir().unwrap();
        let provider = PackageFolderProvider::new(dir.path());
        let range = LibraryRange::new("../escape", VersionReq::STAR, fw());
        assert!(provider.try_resolve(&range).unwrap().is_none());
    }

    #[test]
    fn test_invalid_manifest_is_error() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("Broken").join("1.0.0").join("Broken.manifest.json");
        fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        fs::write(&manifest, "{ not json").unwrap();

        let provider = PackageFolderProvider::new(dir.path());
        let err = provider
            .try_resolve(&LibraryRange::new("Broken", VersionReq::STAR, fw()))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::codes::MANIFEST_INVALID);
    }

    #[test]
    fn test_project_shadows_package_on_disk() {
        let projects = tempdir().unwrap();
        let packages = tempdir().unwrap();

        write_json(
            &projects.path().join("App").join(PROJECT_FILE),
            &json!({ "version": "1.0.0", "dependencies": { "Lib": "^1", "Json": "^6" } }),
        );
        write_json(
            &projects.path().join("Lib").join(PROJECT_FILE),
            &json!({ "version": "1.0.0-beta1" }),
        );
        write_package(packages.path(), "Lib", "1.0.0", json!({ "version": "1.0.0" }));
        write_package(packages.path(), "Json", "6.0.1", json!({ "version": "6.0.1" }));

        let walker = DependencyWalker::new()
            .with_provider(Arc::new(PackageFolderProvider::new(packages.path())))
            .with_provider(Arc::new(ProjectProvider::new(projects.path())));
        let mut graph = walker.walk_range(LibraryRange::new("App", VersionReq::STAR, fw()));
        resolve_conflicts(&mut graph, ConflictPolicy::Highest);

        assert!(graph.is_success(), "{:?}", graph.diagnostics());
        let lib = graph.node(graph.accepted("Lib").unwrap());
        let item = lib.item.as_ref().unwrap();
        assert_eq!(item.library.library_type, LibraryType::Project);
        assert_eq!(item.identity().version.to_string(), "1.0.0-beta1");
        let json_item = graph.node(graph.accepted("Json").unwrap()).item.as_ref().unwrap();
        assert_eq!(json_item.library.library_type, LibraryType::Package);
    }

    #[test]
    fn test_folder_exporter() {
        let packages = tempdir().unwrap();
        let base = packages.path().join("Json").join("6.0.1");
        write_package(packages.path(), "Json", "6.0.1", json!({ "version": "6.0.1" }));
        fs::create_dir_all(base.join("lib/net45")).unwrap();
        fs::create_dir_all(base.join("lib/dnxcore50")).unwrap();
        fs::create_dir_all(base.join("shared/Text")).unwrap();
        fs::write(base.join("lib/net45/Json.dll"), b"dll").unwrap();
        fs::write(base.join("lib/net45/Json.Bson.dll"), b"bson").unwrap();
        fs::write(base.join("lib/dnxcore50/Json.dll"), b"core").unwrap();
        fs::write(base.join("shared/Text/Escape.cs"), b"class Escape {}").unwrap();
        fs::write(base.join("shared/Assert.cs"), b"class Assert {}").unwrap();

        let item = PackageFolderProvider::new(packages.path())
            .try_resolve(&LibraryRange::new("Json", VersionReq::STAR, fw()))
            .unwrap()
            .unwrap();
        let export = PackageFolderExporter::new()
            .export(&item, &ExportTarget::compile(fw()))
            .unwrap();

        let metadata: Vec<&str> = export
            .metadata_references
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(metadata, vec!["Json.Bson", "Json"]);
        assert_eq!(
            export.metadata_references[1].content,
            ReferenceContent::Path(base.join("lib/net45/Json.dll"))
        );

        let sources: Vec<&str> = export
            .source_references
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(sources, vec!["Assert.cs", "Text/Escape.cs"]);
    }

    #[test]
    fn test_folder_exports_through_graph() {
        let packages = tempdir().unwrap();
        let projects = tempdir().unwrap();
        write_json(
            &projects.path().join("App").join(PROJECT_FILE),
            &json!({ "version": "1.0.0", "dependencies": { "A": "*" } }),
        );
        write_package(
            packages.path(),
            "A",
            "1.0.0",
            json!({ "version": "1.0.0", "dependencies": { "B": "*" } }),
        );
        write_package(packages.path(), "B", "1.0.0", json!({ "version": "1.0.0" }));
        for name in ["A", "B"] {
            let base = packages.path().join(name).join("1.0.0");
            fs::create_dir_all(base.join("lib/net45")).unwrap();
            fs::create_dir_all(base.join("shared")).unwrap();
            fs::write(base.join(format!("lib/net45/{name}.dll")), name).unwrap();
            fs::write(base.join(format!("shared/{name}.cs")), name).unwrap();
        }

        let walker = DependencyWalker::new()
            .with_provider(Arc::new(ProjectProvider::new(projects.path())))
            .with_provider(Arc::new(PackageFolderProvider::new(packages.path())));
        let mut graph = walker.walk_range(LibraryRange::new("App", VersionReq::STAR, fw()));
        resolve_conflicts(&mut graph, ConflictPolicy::Highest);

        let exports = get_exports(
            &graph,
            &PackageFolderExporter::new(),
            &ExportTarget::compile(fw()),
            false,
        )
        .unwrap();

        assert!(exports.metadata("A").is_some());
        assert!(exports.metadata("B").is_some());
        let sources: Vec<&str> = exports
            .source_references
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(sources, vec!["A.cs"]);
    }
}
