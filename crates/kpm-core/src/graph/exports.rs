//! Flattening accepted libraries into compiler references.

use super::{DependencyGraph, Disposition, FrameworkId, GraphItem, NodeId};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use tracing::debug;

/// Payload of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceContent {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A named metadata or source reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub content: ReferenceContent,
}

impl Reference {
    #[must_use]
    pub fn path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            content: ReferenceContent::Path(path.into()),
        }
    }

    #[must_use]
    pub fn bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content: ReferenceContent::Bytes(bytes),
        }
    }
}

/// What one library contributes to a compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryExport {
    pub metadata_references: Vec<Reference>,
    pub source_references: Vec<Reference>,
}

/// Compilation target exports are computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportTarget {
    pub framework: FrameworkId,
    /// Build aspect, e.g. `compile` or `runtime`.
    pub aspect: String,
}

impl ExportTarget {
    #[must_use]
    pub fn new(framework: FrameworkId, aspect: impl Into<String>) -> Self {
        Self {
            framework,
            aspect: aspect.into(),
        }
    }

    /// The `compile` aspect for `framework`.
    #[must_use]
    pub fn compile(framework: FrameworkId) -> Self {
        Self::new(framework, "compile")
    }
}

/// Produces the export of a single library.
pub trait LibraryExporter: Send + Sync {
    fn export(&self, library: &GraphItem, target: &ExportTarget) -> Result<LibraryExport>;
}

/// Flattened references for a whole resolved graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryExports {
    /// Deduplicated by name, first seen wins, in discovery order.
    pub metadata_references: Vec<Reference>,
    /// Only from the root's direct dependencies.
    pub source_references: Vec<Reference>,
}

impl LibraryExports {
    /// Find a metadata reference by name.
    #[must_use]
    pub fn metadata(&self, name: &str) -> Option<&Reference> {
        self.metadata_references.iter().find(|r| r.name == name)
    }
}

#[derive(Default)]
struct Collector {
    exports: LibraryExports,
    metadata_names: HashSet<String>,
    source_names: HashSet<String>,
}

impl Collector {
    fn add_metadata(&mut self, references: Vec<Reference>) {
        for reference in references {
            if self.metadata_names.insert(reference.name.clone()) {
                self.exports.metadata_references.push(reference);
            }
        }
    }

    fn add_sources(&mut self, references: Vec<Reference>) {
        for reference in references {
            if self.source_names.insert(reference.name.clone()) {
                self.exports.source_references.push(reference);
            }
        }
    }
}

/// Collect the references a compilation of the graph's root needs.
///
/// Walks accepted libraries breadth-first from the root, following each
/// library's own dependency list to the accepted node of every dependency
/// name. Each library is exported once. Metadata references from deeper
/// libraries never replace one already collected under the same name.
///
/// With `include_root_exports`, the root's own metadata references are
/// collected first. The root's sources are never included.
pub fn get_exports(
    graph: &DependencyGraph,
    exporter: &dyn LibraryExporter,
    target: &ExportTarget,
    include_root_exports: bool,
) -> Result<LibraryExports> {
    let mut collector = Collector::default();
    let root = graph.root();
    let Some(root_item) = graph.node(root).item.as_ref() else {
        return Ok(collector.exports);
    };

    if include_root_exports {
        let export = exporter.export(root_item, target)?;
        collector.add_metadata(export.metadata_references);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(graph.node(root).name());
    let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
    enqueue_dependencies(graph, root_item, 1, &mut visited, &mut queue);

    while let Some((id, level)) = queue.pop_front() {
        let Some(item) = graph.node(id).item.as_ref() else {
            continue;
        };

        let export = exporter.export(item, target)?;
        collector.add_metadata(export.metadata_references);
        if level == 1 {
            collector.add_sources(export.source_references);
        }

        enqueue_dependencies(graph, item, level + 1, &mut visited, &mut queue);
    }

    debug!(
        libraries = visited.len(),
        metadata = collector.exports.metadata_references.len(),
        sources = collector.exports.source_references.len(),
        "Collected exports"
    );
    Ok(collector.exports)
}

fn enqueue_dependencies<'g>(
    graph: &'g DependencyGraph,
    item: &GraphItem,
    level: usize,
    visited: &mut HashSet<&'g str>,
    queue: &mut VecDeque<(NodeId, usize)>,
) {
    for range in &item.dependencies {
        let Some(id) = graph.accepted(&range.name) else {
            continue;
        };
        debug_assert_eq!(graph.node(id).disposition, Disposition::Accepted);
        let name = graph.node(id).name();
        if visited.insert(name) {
            queue.push_back((id, level));
        }
    }
}
