//! Dependency graph resolution.
//!
//! A [`DependencyWalker`] expands a root request through an ordered list of
//! [`LibraryProvider`]s into a per-edge tree stored in a [`DependencyGraph`]
//! arena. [`resolve_conflicts`] then settles one accepted node per library
//! name, and [`get_exports`] flattens the accepted libraries into the
//! reference sets a compiler consumes.
//!
//! Resolution problems never abort: they are collected as [`Diagnostic`]s on
//! the graph. Only an unresolved root or direct dependency makes
//! [`DependencyGraph::is_success`] false.

mod caching;
mod conflict;
mod exports;
mod folder;
mod provider;
mod walk;

pub use caching::CachingExporter;
pub use conflict::resolve_conflicts;
pub use exports::{
    get_exports, ExportTarget, LibraryExport, LibraryExporter, LibraryExports, Reference,
    ReferenceContent,
};
pub use folder::{
    FrameworkSection, Manifest, PackageFolderExporter, PackageFolderProvider, ProjectProvider,
    MANIFEST_SUFFIX, PROJECT_FILE,
};
pub use provider::{LibraryProvider, ProviderPriority};
pub use walk::{DependencyWalker, WalkOptions};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Schema version for serialized graph output.
pub const GRAPH_SCHEMA_VERSION: u32 = 1;

/// Diagnostic codes.
pub mod codes {
    pub const GRAPH_UNRESOLVED: &str = "GRAPH_UNRESOLVED";
    pub const GRAPH_NO_VIABLE_CANDIDATE: &str = "GRAPH_NO_VIABLE_CANDIDATE";
    pub const GRAPH_DEPTH_LIMIT_REACHED: &str = "GRAPH_DEPTH_LIMIT_REACHED";
    pub const GRAPH_PROVIDER_FAILED: &str = "GRAPH_PROVIDER_FAILED";
}

/// Target framework moniker, e.g. `net45` or `dnxcore50`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameworkId(String);

impl FrameworkId {
    #[must_use]
    pub fn new(moniker: impl Into<String>) -> Self {
        Self(moniker.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryIdentity {
    pub name: String,
    pub version: Version,
}

impl LibraryIdentity {
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for LibraryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A request for a library: name, acceptable versions and target framework.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryRange {
    pub name: String,
    pub version_req: VersionReq,
    pub framework: FrameworkId,
}

impl LibraryRange {
    #[must_use]
    pub fn new(name: impl Into<String>, version_req: VersionReq, framework: FrameworkId) -> Self {
        Self {
            name: name.into(),
            version_req,
            framework,
        }
    }

    /// A request for exactly `version`.
    #[must_use]
    pub fn exact(name: impl Into<String>, version: &Version, framework: FrameworkId) -> Self {
        let version_req = VersionReq {
            comparators: vec![semver::Comparator {
                op: semver::Op::Exact,
                major: version.major,
                minor: Some(version.minor),
                patch: Some(version.patch),
                pre: version.pre.clone(),
            }],
        };
        Self::new(name, version_req, framework)
    }

    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.version_req.matches(version)
    }
}

impl fmt::Display for LibraryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version_req, self.framework)
    }
}

/// Where a library came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    Project,
    Package,
    Unresolved,
}

impl LibraryType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Package => "package",
            Self::Unresolved => "unresolved",
        }
    }
}

/// A provider's answer for a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMatch {
    pub identity: LibraryIdentity,
    /// Name of the provider that supplied the library.
    pub provider: String,
    /// Directory holding the library's files.
    pub path: PathBuf,
    pub library_type: LibraryType,
}

/// A resolved library and its direct dependency requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphItem {
    pub library: ProviderMatch,
    pub dependencies: Vec<LibraryRange>,
}

impl GraphItem {
    #[must_use]
    pub fn identity(&self) -> &LibraryIdentity {
        &self.library.identity
    }
}

/// Conflict-resolution state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Not yet settled.
    #[default]
    Acceptable,
    Rejected,
    Accepted,
}

/// Stable id of a node within one [`DependencyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// One edge of the tree. The same library may appear under many nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub range: LibraryRange,
    /// `None` when no provider could supply the range.
    pub item: Option<GraphItem>,
    pub dependencies: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub depth: usize,
    pub disposition: Disposition,
}

impl GraphNode {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.range.name
    }

    #[must_use]
    pub fn version(&self) -> Option<&Version> {
        self.item.as_ref().map(|item| &item.library.identity.version)
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.item.is_some()
    }
}

/// Kind of resolution problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Unresolved,
    NoViableCandidate,
    DepthLimitReached,
    ProviderFailed,
}

impl DiagnosticKind {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unresolved => codes::GRAPH_UNRESOLVED,
            Self::NoViableCandidate => codes::GRAPH_NO_VIABLE_CANDIDATE,
            Self::DepthLimitReached => codes::GRAPH_DEPTH_LIMIT_REACHED,
            Self::ProviderFailed => codes::GRAPH_PROVIDER_FAILED,
        }
    }
}

/// A resolution problem tied to one library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable code.
    pub code: String,
    pub kind: DiagnosticKind,
    /// Library name the problem concerns.
    pub library: String,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: DiagnosticKind, library: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: kind.code().to_string(),
            kind,
            library: library.into(),
            message: message.into(),
        }
    }

    /// Get a sort key for deterministic ordering.
    fn sort_key(&self) -> (&str, &str, &str) {
        (self.code.as_str(), self.library.as_str(), self.message.as_str())
    }
}

/// Arena holding the expanded tree, a name index and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub schema_version: u32,
    pub framework: FrameworkId,
    nodes: Vec<GraphNode>,
    by_name: BTreeMap<String, Vec<NodeId>>,
    diagnostics: Vec<Diagnostic>,
}

impl DependencyGraph {
    /// Create a graph holding only the root request.
    #[must_use]
    pub fn new(root: LibraryRange) -> Self {
        let framework = root.framework.clone();
        let mut graph = Self {
            schema_version: GRAPH_SCHEMA_VERSION,
            framework,
            nodes: Vec::new(),
            by_name: BTreeMap::new(),
            diagnostics: Vec::new(),
        };
        graph.push_node(root, None);
        graph
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[must_use]
    pub fn root_node(&self) -> &GraphNode {
        &self.nodes[0]
    }

    /// Look up a node. Ids come from this graph, so indexing cannot fail.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
        &mut self.nodes[id.0]
    }

    /// All nodes in discovery (breadth-first) order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct library names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Every node carrying `name`, in discovery order.
    #[must_use]
    pub fn candidates(&self, name: &str) -> &[NodeId] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// The accepted node for `name`, if conflicts have been resolved.
    #[must_use]
    pub fn accepted(&self, name: &str) -> Option<NodeId> {
        self.candidates(name)
            .iter()
            .copied()
            .find(|id| self.node(*id).disposition == Disposition::Accepted)
    }

    /// Accepted libraries sorted by name.
    #[must_use]
    pub fn accepted_libraries(&self) -> Vec<&GraphItem> {
        self.by_name
            .keys()
            .filter_map(|name| self.accepted(name))
            .filter_map(|id| self.node(id).item.as_ref())
            .collect()
    }

    /// Whether `name` is `id` itself or one of its ancestors.
    #[must_use]
    pub fn on_path(&self, id: NodeId, name: &str) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if node.name() == name {
                return true;
            }
            current = node.parent;
        }
        false
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// False when the root or one of its direct dependencies is unresolved.
    #[must_use]
    pub fn is_success(&self) -> bool {
        let root = self.root_node();
        root.is_resolved()
            && root
                .dependencies
                .iter()
                .all(|id| self.node(*id).is_resolved())
    }

    pub(crate) fn push_node(&mut self, range: LibraryRange, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let depth = parent.map_or(0, |p| self.node(p).depth + 1);
        self.by_name.entry(range.name.clone()).or_default().push(id);
        self.nodes.push(GraphNode {
            range,
            item: None,
            dependencies: Vec::new(),
            parent,
            depth,
            disposition: Disposition::Acceptable,
        });
        if let Some(parent) = parent {
            self.node_mut(parent).dependencies.push(id);
        }
        id
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub(crate) fn retain_diagnostics(&mut self, keep: impl FnMut(&Diagnostic) -> bool) {
        self.diagnostics.retain(keep);
    }

    pub(crate) fn sort_diagnostics(&mut self) {
        self.diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self.diagnostics.dedup();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::Result;
    use std::collections::HashMap;

    /// In-memory provider: `name -> [(version, [(dep, req)])]`.
    #[derive(Debug)]
    pub struct MemoryProvider {
        pub label: String,
        pub priority: ProviderPriority,
        pub libraries: HashMap<String, Vec<(Version, Vec<(String, VersionReq)>)>>,
    }

    impl MemoryProvider {
        pub fn new(label: &str, priority: ProviderPriority) -> Self {
            Self {
                label: label.to_string(),
                priority,
                libraries: HashMap::new(),
            }
        }

        pub fn with(mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
            let deps = deps
                .iter()
                .map(|(n, r)| ((*n).to_string(), VersionReq::parse(r).unwrap()))
                .collect();
            self.libraries
                .entry(name.to_string())
                .or_default()
                .push((Version::parse(version).unwrap(), deps));
            self
        }
    }

    impl LibraryProvider for MemoryProvider {
        fn name(&self) -> &str {
            &self.label
        }

        fn priority(&self) -> ProviderPriority {
            self.priority
        }

        fn try_resolve(&self, range: &LibraryRange) -> Result<Option<GraphItem>> {
            let Some(versions) = self.libraries.get(&range.name) else {
                return Ok(None);
            };
            let best = versions
                .iter()
                .filter(|(v, _)| range.matches(v))
                .max_by(|a, b| a.0.cmp(&b.0));
            Ok(best.map(|(version, deps)| GraphItem {
                library: ProviderMatch {
                    identity: LibraryIdentity::new(&range.name, version.clone()),
                    provider: self.label.clone(),
                    path: PathBuf::from(format!("/{}/{}/{version}", self.label, range.name)),
                    library_type: match self.priority {
                        ProviderPriority::Project => LibraryType::Project,
                        ProviderPriority::Package => LibraryType::Package,
                    },
                },
                dependencies: deps
                    .iter()
                    .map(|(n, r)| LibraryRange::new(n, r.clone(), range.framework.clone()))
                    .collect(),
            }))
        }
    }

    pub fn fw() -> FrameworkId {
        FrameworkId::new("net45")
    }

    pub fn any(name: &str) -> LibraryRange {
        LibraryRange::new(name, VersionReq::STAR, fw())
    }
}
