//! `kpm graph`: resolve a project against local projects and a package folder.

use super::{fail, print_json};
use kpm_core::config::ConflictPolicy;
use kpm_core::graph::{CachingExporter, ReferenceContent, GRAPH_SCHEMA_VERSION};
use kpm_core::paths::packages_dir;
use kpm_core::{
    get_exports, resolve_conflicts, Config, DependencyGraph, DependencyWalker, Diagnostic,
    Disposition, ExportTarget, FrameworkId, LibraryExports, LibraryRange, NodeId,
    PackageFolderExporter, PackageFolderProvider, ProjectProvider, Reference,
};
use miette::Result;
use semver::VersionReq;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments of `kpm graph`, with paths already resolved.
#[derive(Debug)]
pub struct GraphArgs {
    pub project: PathBuf,
    pub packages: Option<PathBuf>,
    pub framework: String,
    pub format: String,
    pub exports: bool,
}

#[derive(Serialize)]
struct GraphResult<'a> {
    ok: bool,
    schema_version: u32,
    root: String,
    framework: &'a str,
    policy: ConflictPolicy,
    /// Accepted libraries, sorted by name.
    libraries: Vec<LibraryEntry>,
    nodes: Vec<NodeEntry>,
    diagnostics: &'a [Diagnostic],
    #[serde(skip_serializing_if = "Option::is_none")]
    exports: Option<ExportsEntry>,
}

#[derive(Serialize)]
struct LibraryEntry {
    name: String,
    version: String,
    #[serde(rename = "type")]
    library_type: &'static str,
    provider: String,
    path: String,
}

#[derive(Serialize)]
struct NodeEntry {
    id: usize,
    name: String,
    range: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    disposition: Disposition,
    depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<usize>,
    dependencies: Vec<usize>,
}

#[derive(Serialize)]
struct ExportsEntry {
    metadata_references: Vec<ReferenceEntry>,
    source_references: Vec<ReferenceEntry>,
}

#[derive(Serialize)]
struct ReferenceEntry {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

impl From<&Reference> for ReferenceEntry {
    fn from(reference: &Reference) -> Self {
        Self {
            name: reference.name.clone(),
            path: match &reference.content {
                ReferenceContent::Path(path) => Some(path.display().to_string()),
                ReferenceContent::Bytes(_) => None,
            },
        }
    }
}

pub fn run(config: &Config, args: &GraphArgs, json: bool) -> Result<()> {
    let project = args
        .project
        .canonicalize()
        .unwrap_or_else(|_| args.project.clone());
    let Some(name) = project.file_name().map(|n| n.to_string_lossy().to_string()) else {
        let err = kpm_core::Error::other(format!("Invalid project path {}", project.display()));
        return fail("graph", err, json);
    };
    let projects_root = project
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let packages = args
        .packages
        .clone()
        .unwrap_or_else(|| packages_dir(config.channel));
    let framework = FrameworkId::new(&args.framework);

    let walker = DependencyWalker::new()
        .with_provider(Arc::new(ProjectProvider::new(projects_root)))
        .with_provider(Arc::new(PackageFolderProvider::new(packages)));
    let mut graph = walker.walk_range(LibraryRange::new(
        &name,
        VersionReq::STAR,
        framework.clone(),
    ));
    resolve_conflicts(&mut graph, config.conflict_policy);

    let exports = if args.exports {
        let target = ExportTarget::compile(framework);
        let exporter = CachingExporter::new(PackageFolderExporter::new());
        match get_exports(&graph, &exporter, &target, false) {
            Ok(exports) => Some(exports),
            Err(e) => return fail("graph", e, json),
        }
    } else {
        None
    };

    let ok = graph.is_success();
    if json {
        print_json(&GraphResult {
            ok,
            schema_version: GRAPH_SCHEMA_VERSION,
            root: project.display().to_string(),
            framework: &args.framework,
            policy: config.conflict_policy,
            libraries: library_entries(&graph),
            nodes: node_entries(&graph),
            diagnostics: graph.diagnostics(),
            exports: exports.as_ref().map(|e| ExportsEntry {
                metadata_references: e.metadata_references.iter().map(Into::into).collect(),
                source_references: e.source_references.iter().map(Into::into).collect(),
            }),
        })?;
    } else {
        print_graph_human(&graph, &args.format, exports.as_ref());
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn library_entries(graph: &DependencyGraph) -> Vec<LibraryEntry> {
    graph
        .accepted_libraries()
        .into_iter()
        .map(|item| LibraryEntry {
            name: item.library.identity.name.clone(),
            version: item.library.identity.version.to_string(),
            library_type: item.library.library_type.as_str(),
            provider: item.library.provider.clone(),
            path: item.library.path.display().to_string(),
        })
        .collect()
}

fn node_entries(graph: &DependencyGraph) -> Vec<NodeEntry> {
    graph
        .nodes()
        .map(|(id, node)| NodeEntry {
            id: id.0,
            name: node.name().to_string(),
            range: node.range.version_req.to_string(),
            version: node.version().map(ToString::to_string),
            disposition: node.disposition,
            depth: node.depth,
            parent: node.parent.map(|p| p.0),
            dependencies: node.dependencies.iter().map(|d| d.0).collect(),
        })
        .collect()
}

/// Print the resolved graph in human-readable format.
fn print_graph_human(graph: &DependencyGraph, format: &str, exports: Option<&LibraryExports>) {
    for diagnostic in graph.diagnostics() {
        eprintln!(
            "! [{}] {}: {}",
            diagnostic.code, diagnostic.library, diagnostic.message
        );
    }

    match format {
        "list" => print_graph_list(graph),
        _ => {
            println!("{}", node_label(graph, graph.root()));
            print_children(graph, graph.root(), "");
        }
    }

    if let Some(exports) = exports {
        println!("\nMetadata references:");
        for reference in &exports.metadata_references {
            println!("  {}", reference_line(reference));
        }
        println!("\nSource references:");
        for reference in &exports.source_references {
            println!("  {}", reference_line(reference));
        }
    }
}

fn print_graph_list(graph: &DependencyGraph) {
    let libraries = graph.accepted_libraries();
    if libraries.is_empty() {
        println!("(no libraries resolved)");
        return;
    }
    for item in libraries {
        println!(
            "{} ({})",
            item.library.identity,
            item.library.library_type.as_str()
        );
    }
}

fn print_children(graph: &DependencyGraph, id: NodeId, prefix: &str) {
    let children = &graph.node(id).dependencies;
    for (i, child) in children.iter().enumerate() {
        let is_last = i == children.len() - 1;
        let connector = if is_last { "└── " } else { "├── " };
        let next_prefix = if is_last { "    " } else { "│   " };

        println!("{prefix}{connector}{}", node_label(graph, *child));
        print_children(graph, *child, &format!("{prefix}{next_prefix}"));
    }
}

fn node_label(graph: &DependencyGraph, id: NodeId) -> String {
    let node = graph.node(id);
    let Some(item) = &node.item else {
        return format!("{} {} (unresolved)", node.name(), node.range.version_req);
    };

    let mut label = item.library.identity.to_string();
    if item.library.library_type == kpm_core::LibraryType::Project {
        label.push_str(" [project]");
    }
    if node.disposition == Disposition::Rejected {
        label.push_str(" (rejected)");
    }
    label
}

fn reference_line(reference: &Reference) -> String {
    match &reference.content {
        ReferenceContent::Path(path) => format!("{} {}", reference.name, path.display()),
        ReferenceContent::Bytes(bytes) => format!("{} <{} bytes>", reference.name, bytes.len()),
    }
}
